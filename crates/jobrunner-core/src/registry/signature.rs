//! Argument signatures: which positional arguments a target accepts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;

/// JSON shape accepted at one argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    /// Anything, including `null`.
    Any,
    String,
    Integer,
    Number,
    Bool,
    Array,
    Object,
}

impl ArgKind {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ArgKind::Any => true,
            ArgKind::String => value.is_string(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Number => value.is_number(),
            ArgKind::Bool => value.is_boolean(),
            ArgKind::Array => value.is_array(),
            ArgKind::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub kind: ArgKind,
    pub optional: bool,
}

/// Ordered parameter list, optionally followed by a variadic tail.
///
/// Required parameters must come before optional ones; the registry rejects
/// signatures that break this when they are registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    params: Vec<Param>,
    rest: Option<ArgKind>,
}

impl Signature {
    /// No arguments accepted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Any number of arguments of any shape.
    pub fn any() -> Self {
        Self::new().rest(ArgKind::Any)
    }

    pub fn param(mut self, name: impl Into<String>, kind: ArgKind) -> Self {
        self.params.push(Param {
            name: name.into(),
            kind,
            optional: false,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: ArgKind) -> Self {
        self.params.push(Param {
            name: name.into(),
            kind,
            optional: true,
        });
        self
    }

    /// Accept any number of trailing arguments of `kind`.
    pub fn rest(mut self, kind: ArgKind) -> Self {
        self.rest = Some(kind);
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    fn required(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    /// Structural check run once at registration.
    pub(crate) fn check(&self) -> Result<(), String> {
        if let Some(pos) = self.params.iter().position(|p| p.optional)
            && let Some(late) = self.params[pos..].iter().find(|p| !p.optional)
        {
            return Err(format!(
                "required parameter '{}' follows an optional one",
                late.name
            ));
        }
        Ok(())
    }

    /// Check arity and per-position kinds of a submitted argument list.
    pub fn validate(&self, args: &[Value]) -> Result<(), JobError> {
        let required = self.required();
        if args.len() < required {
            return Err(JobError::Validation(format!(
                "malformed arguments: expected at least {required}, got {}",
                args.len()
            )));
        }
        if self.rest.is_none() && args.len() > self.params.len() {
            return Err(JobError::Validation(format!(
                "malformed arguments: expected at most {}, got {}",
                self.params.len(),
                args.len()
            )));
        }

        for (index, value) in args.iter().enumerate() {
            let (name, kind) = match self.params.get(index) {
                Some(param) => (param.name.as_str(), param.kind),
                None => ("rest", self.rest.unwrap_or(ArgKind::Any)),
            };
            if !kind.accepts(value) {
                return Err(JobError::Validation(format!(
                    "malformed arguments: argument {index} ('{name}') expected {kind:?}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn report() -> Signature {
        Signature::new()
            .param("name", ArgKind::String)
            .optional("pages", ArgKind::Integer)
    }

    #[rstest]
    #[case::required_only(vec![json!("weekly")])]
    #[case::with_optional(vec![json!("weekly"), json!(3)])]
    fn accepts_well_formed(#[case] args: Vec<Value>) {
        assert!(report().validate(&args).is_ok());
    }

    #[rstest]
    #[case::missing_required(vec![])]
    #[case::too_many(vec![json!("weekly"), json!(3), json!(true)])]
    #[case::wrong_kind(vec![json!(7)])]
    #[case::float_for_integer(vec![json!("weekly"), json!(1.5)])]
    #[case::null_for_string(vec![Value::Null])]
    fn rejects_malformed(#[case] args: Vec<Value>) {
        let err = report().validate(&args).unwrap_err();
        assert!(matches!(err, JobError::Validation(msg) if msg.starts_with("malformed arguments")));
    }

    #[test]
    fn rest_accepts_trailing_values_of_its_kind() {
        let sig = Signature::new().param("to", ArgKind::String).rest(ArgKind::Number);
        assert!(sig.validate(&[json!("a"), json!(1), json!(2.5)]).is_ok());
        assert!(sig.validate(&[json!("a"), json!("b")]).is_err());
    }

    #[test]
    fn any_accepts_everything() {
        assert!(Signature::any().validate(&[]).is_ok());
        assert!(Signature::any().validate(&[Value::Null, json!({"k": 1})]).is_ok());
    }

    #[test]
    fn empty_signature_takes_no_arguments() {
        assert!(Signature::new().validate(&[]).is_ok());
        assert!(Signature::new().validate(&[json!(1)]).is_err());
    }

    #[test]
    fn required_after_optional_fails_the_structural_check() {
        let sig = Signature::new()
            .optional("a", ArgKind::Any)
            .param("b", ArgKind::Any);
        assert!(sig.check().unwrap_err().contains("'b'"));
        assert!(report().check().is_ok());
    }
}
