use serde::{Deserialize, Serialize};

use crate::channels::operators::{self as ops, Operator};
use crate::types::SignalId;

/// Kind of math channel together with its inputs.
///
/// `R` is how inputs are referenced: [`SignalId`] inside a session, channel
/// names in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MathKind<R = SignalId> {
    Divide { dividend: R, divisor: R },
    Multiply { a: R, b: R },
    Subtract { minuend: R, subtrahend: R },
    Sum { inputs: Vec<(R, f64)> },
    ScaleOffset { input: R, scale: f64, offset: f64 },
    Integrate { input: R, y0: f64 },
    MovingAverage { input: R, window: usize },
}

impl<R> MathKind<R> {
    /// Inputs in the order the operator consumes them. The first is the
    /// primary input whose timestamps the output inherits.
    pub fn inputs(&self) -> Vec<&R> {
        use MathKind::*;
        match self {
            Divide { dividend, divisor } => vec![dividend, divisor],
            Multiply { a, b } => vec![a, b],
            Subtract {
                minuend,
                subtrahend,
            } => vec![minuend, subtrahend],
            Sum { inputs } => inputs.iter().map(|(r, _)| r).collect(),
            ScaleOffset { input, .. } | Integrate { input, .. } | MovingAverage { input, .. } => {
                vec![input]
            }
        }
    }

    pub fn try_map<S, E>(self, mut f: impl FnMut(R) -> Result<S, E>) -> Result<MathKind<S>, E> {
        use MathKind::*;
        Ok(match self {
            Divide { dividend, divisor } => Divide {
                dividend: f(dividend)?,
                divisor: f(divisor)?,
            },
            Multiply { a, b } => Multiply { a: f(a)?, b: f(b)? },
            Subtract {
                minuend,
                subtrahend,
            } => Subtract {
                minuend: f(minuend)?,
                subtrahend: f(subtrahend)?,
            },
            Sum { inputs } => Sum {
                inputs: inputs
                    .into_iter()
                    .map(|(r, k)| f(r).map(|s| (s, k)))
                    .collect::<Result<_, _>>()?,
            },
            ScaleOffset {
                input,
                scale,
                offset,
            } => ScaleOffset {
                input: f(input)?,
                scale,
                offset,
            },
            Integrate { input, y0 } => Integrate {
                input: f(input)?,
                y0,
            },
            MovingAverage { input, window } => MovingAverage {
                input: f(input)?,
                window,
            },
        })
    }

    pub fn operator(&self) -> Box<dyn Operator> {
        match self {
            MathKind::Divide { .. } => Box::new(ops::Divide),
            MathKind::Multiply { .. } => Box::new(ops::Multiply),
            MathKind::Subtract { .. } => Box::new(ops::Subtract),
            MathKind::Sum { inputs } => {
                Box::new(ops::Sum::new(inputs.iter().map(|(_, k)| *k).collect()))
            }
            MathKind::ScaleOffset { scale, offset, .. } => Box::new(ops::ScaleOffset {
                scale: *scale,
                offset: *offset,
            }),
            MathKind::Integrate { y0, .. } => Box::new(ops::Integrate::new(*y0)),
            MathKind::MovingAverage { window, .. } => Box::new(ops::MovingAverage::new(*window)),
        }
    }

    /// Human-readable formula, given the display names of the inputs.
    pub fn describe(&self, names: &[String]) -> String {
        let name = |i: usize| names.get(i).map(String::as_str).unwrap_or("?");
        match self {
            MathKind::Divide { .. } => format!("{} / {}", name(0), name(1)),
            MathKind::Multiply { .. } => format!("{} * {}", name(0), name(1)),
            MathKind::Subtract { .. } => format!("{} - {}", name(0), name(1)),
            MathKind::Sum { inputs } => {
                if inputs.is_empty() {
                    return "sum()".to_string();
                }
                inputs
                    .iter()
                    .enumerate()
                    .map(|(i, (_, k))| {
                        if (*k - 1.0).abs() < 1e-12 {
                            name(i).to_string()
                        } else {
                            format!("{k}*{}", name(i))
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" + ")
            }
            MathKind::ScaleOffset { scale, offset, .. } => {
                format!("{scale}*{} + {offset}", name(0))
            }
            MathKind::Integrate { y0, .. } => format!("∫ {} dt  (y0 = {y0})", name(0)),
            MathKind::MovingAverage { window, .. } => format!("avg{window}({})", name(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_config_and_resolves_ids() {
        let json = r#"{ "op": "divide", "dividend": "V", "divisor": "I" }"#;
        let kind: MathKind<String> = serde_json::from_str(json).unwrap();
        let resolved = kind
            .try_map(|name| match name.as_str() {
                "V" => Ok(SignalId(1)),
                "I" => Ok(SignalId(2)),
                other => Err(other.to_string()),
            })
            .unwrap();
        assert_eq!(
            resolved,
            MathKind::Divide {
                dividend: SignalId(1),
                divisor: SignalId(2)
            }
        );
        assert_eq!(resolved.inputs(), vec![&SignalId(1), &SignalId(2)]);
    }

    #[test]
    fn unknown_name_fails_resolution() {
        let kind: MathKind<String> = MathKind::Sum {
            inputs: vec![("a".into(), 1.0), ("zz".into(), 2.0)],
        };
        let err = kind
            .try_map(|n| if n == "a" { Ok(SignalId(1)) } else { Err(n) })
            .unwrap_err();
        assert_eq!(err, "zz");
    }

    #[test]
    fn describes_formula() {
        let names = vec!["V".to_string(), "I".to_string()];
        let kind = MathKind::Sum {
            inputs: vec![(SignalId(1), 1.0), (SignalId(2), 2.0)],
        };
        assert_eq!(kind.describe(&names), "V + 2*I");
        let div = MathKind::Divide {
            dividend: SignalId(1),
            divisor: SignalId(2),
        };
        assert_eq!(div.describe(&names), "V / I");
        assert_eq!(div.operator().name(), "divide");
    }
}
