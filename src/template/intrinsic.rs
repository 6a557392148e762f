//! Recognition of intrinsic-function expressions.
//!
//! An intrinsic is a JSON object with exactly one key, where the key is
//! either `Ref` or starts with `Fn::`. Parsing only checks the shape of the
//! arguments; nested expressions are left for the evaluator.

use serde_json::Value;

use crate::error::EvaluationError;

/// The reference keyword.
pub const REF: &str = "Ref";
/// Prefix shared by every named intrinsic.
pub const INTRINSIC_PREFIX: &str = "Fn::";

const FN_GET_ATT: &str = "Fn::GetAtt";
const FN_JOIN: &str = "Fn::Join";
const FN_SPLIT: &str = "Fn::Split";
const FN_SELECT: &str = "Fn::Select";
const FN_SUB: &str = "Fn::Sub";
const FN_IMPORT_VALUE: &str = "Fn::ImportValue";

/// A recognized intrinsic with borrowed, unevaluated arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intrinsic<'a> {
    /// `{"Ref": "LogicalId"}`
    Ref(&'a str),
    /// `{"Fn::GetAtt": ["LogicalId", "Attr"]}` or `{"Fn::GetAtt": "LogicalId.Attr"}`
    GetAtt {
        /// Target logical ID.
        logical_id: &'a str,
        /// Attribute name, possibly dotted (`Outputs.Name`).
        attribute: &'a str,
    },
    /// `{"Fn::Join": [separator, list]}`
    Join {
        /// Separator placed between elements.
        separator: &'a str,
        /// List expression.
        list: &'a Value,
    },
    /// `{"Fn::Split": [separator, string]}`
    Split {
        /// Separator to split on.
        separator: &'a str,
        /// String expression.
        source: &'a Value,
    },
    /// `{"Fn::Select": [index, list]}`
    Select {
        /// Zero-based index.
        index: usize,
        /// List expression.
        list: &'a Value,
    },
    /// `{"Fn::Sub": template}` or `{"Fn::Sub": [template, placeholders]}`
    Sub {
        /// Template string containing `${...}` markers.
        template: &'a str,
        /// Explicit placeholder expression, if any.
        placeholders: Option<&'a Value>,
    },
    /// `{"Fn::ImportValue": name}`
    ImportValue(&'a Value),
}

impl<'a> Intrinsic<'a> {
    /// Recognizes an intrinsic expression.
    ///
    /// Returns `Ok(None)` when the value is not intrinsic-shaped.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown `Fn::` names and for arguments of the
    /// wrong shape.
    pub fn parse(value: &'a Value) -> Result<Option<Self>, EvaluationError> {
        let Value::Object(map) = value else {
            return Ok(None);
        };
        if map.len() != 1 {
            return Ok(None);
        }
        let Some((name, args)) = map.iter().next() else {
            return Ok(None);
        };
        if name != REF && !name.starts_with(INTRINSIC_PREFIX) {
            return Ok(None);
        }

        let intrinsic = match name.as_str() {
            REF => Self::Ref(expect_str(REF, args)?),
            FN_GET_ATT => parse_get_att(args)?,
            FN_JOIN => {
                let (separator, list) = expect_pair(FN_JOIN, args)?;
                Self::Join {
                    separator: expect_str(FN_JOIN, separator)?,
                    list,
                }
            }
            FN_SPLIT => {
                let (separator, source) = expect_pair(FN_SPLIT, args)?;
                Self::Split {
                    separator: expect_str(FN_SPLIT, separator)?,
                    source,
                }
            }
            FN_SELECT => {
                let (index, list) = expect_pair(FN_SELECT, args)?;
                Self::Select {
                    index: parse_index(index)?,
                    list,
                }
            }
            FN_SUB => parse_sub(args)?,
            FN_IMPORT_VALUE => Self::ImportValue(args),
            other => {
                return Err(EvaluationError::UnsupportedIntrinsic {
                    name: other.to_string(),
                });
            }
        };

        Ok(Some(intrinsic))
    }

    /// Name of the intrinsic as written in templates.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ref(_) => REF,
            Self::GetAtt { .. } => FN_GET_ATT,
            Self::Join { .. } => FN_JOIN,
            Self::Split { .. } => FN_SPLIT,
            Self::Select { .. } => FN_SELECT,
            Self::Sub { .. } => FN_SUB,
            Self::ImportValue(_) => FN_IMPORT_VALUE,
        }
    }
}

fn parse_get_att(args: &Value) -> Result<Intrinsic<'_>, EvaluationError> {
    match args {
        Value::String(dotted) => {
            let (logical_id, attribute) = dotted.split_once('.').ok_or_else(|| {
                EvaluationError::malformed(FN_GET_ATT, "expected 'LogicalId.Attribute'")
            })?;
            Ok(Intrinsic::GetAtt {
                logical_id,
                attribute,
            })
        }
        _ => {
            let (logical_id, attribute) = expect_pair(FN_GET_ATT, args)?;
            Ok(Intrinsic::GetAtt {
                logical_id: expect_str(FN_GET_ATT, logical_id)?,
                attribute: expect_str(FN_GET_ATT, attribute)?,
            })
        }
    }
}

fn parse_sub(args: &Value) -> Result<Intrinsic<'_>, EvaluationError> {
    match args {
        Value::String(template) => Ok(Intrinsic::Sub {
            template,
            placeholders: None,
        }),
        Value::Array(items) if items.len() == 1 || items.len() == 2 => Ok(Intrinsic::Sub {
            template: expect_str(FN_SUB, &items[0])?,
            placeholders: items.get(1),
        }),
        _ => Err(EvaluationError::malformed(
            FN_SUB,
            "expected a string or [string, placeholders]",
        )),
    }
}

fn parse_index(index: &Value) -> Result<usize, EvaluationError> {
    let parsed = match index {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| EvaluationError::type_mismatch(FN_SELECT, "a non-negative index", index))
}

fn expect_str<'a>(name: &str, value: &'a Value) -> Result<&'a str, EvaluationError> {
    value
        .as_str()
        .ok_or_else(|| EvaluationError::type_mismatch(name, "a string", value))
}

fn expect_pair<'a>(name: &str, value: &'a Value) -> Result<(&'a Value, &'a Value), EvaluationError> {
    match value {
        Value::Array(items) if items.len() == 2 => Ok((&items[0], &items[1])),
        _ => Err(EvaluationError::malformed(name, "expected a list of two elements")),
    }
}
