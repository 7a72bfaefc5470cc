//! Wire models shared between the engine and endpoint connectors.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// A single field value as exchanged with a remote endpoint.
pub type FieldValue = serde_json::Value;

/// Named field values, used both for call arguments and for returned records.
pub type Fields = serde_json::Map<String, FieldValue>;

/// A record as returned by a remote endpoint.
pub type RemoteRecord = Fields;

/// Name of a tenant (a company) hosted behind a shared base endpoint.
///
/// The empty name is reserved for the unscoped endpoint used in
/// single-endpoint mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Sentinel tenant addressing the base endpoint without a company scope.
    #[must_use]
    pub fn unscoped() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_unscoped(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The company scope to address, or `None` for the unscoped endpoint.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        if self.is_unscoped() {
            None
        } else {
            Some(&self.0)
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unscoped() {
            f.write_str("<unscoped>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque identifier of a record inside one tenant.
///
/// Keys are compared verbatim and never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(String);

impl RemoteKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract a key from a field value. Strings are taken verbatim and
    /// numbers are rendered in their canonical form.
    #[must_use]
    pub fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::String(s) if !s.is_empty() => Some(Self(s.clone())),
            FieldValue::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<RemoteKey> for FieldValue {
    fn from(value: RemoteKey) -> Self {
        FieldValue::String(value.0)
    }
}

/// Comparison operator of a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::Eq => write!(f, "eq"),
            FilterOp::Ne => write!(f, "ne"),
            FilterOp::Gt => write!(f, "gt"),
            FilterOp::Ge => write!(f, "ge"),
            FilterOp::Lt => write!(f, "lt"),
            FilterOp::Le => write!(f, "le"),
            FilterOp::Contains => write!(f, "contains"),
            FilterOp::StartsWith => write!(f, "starts_with"),
            FilterOp::EndsWith => write!(f, "ends_with"),
        }
    }
}

/// One field/operator/value triple of a multi-record read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    pub value: FieldValue,
}

impl FilterCondition {
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Equality conditions for every criterion, in key order.
    #[must_use]
    pub fn from_criteria(criteria: &Fields) -> Vec<Self> {
        criteria
            .iter()
            .map(|(field, value)| Self::eq(field.clone(), value.clone()))
            .collect()
    }
}

/// Shape of a remote operation's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResponse {
    Record(RemoteRecord),
    Records(Vec<RemoteRecord>),
    Flag(bool),
    Value(FieldValue),
    Empty,
}

impl RemoteResponse {
    /// Classify an untyped JSON answer.
    #[must_use]
    pub fn from_value(value: FieldValue) -> Self {
        match value {
            FieldValue::Null => Self::Empty,
            FieldValue::Bool(flag) => Self::Flag(flag),
            FieldValue::Object(record) => Self::Record(record),
            FieldValue::Array(items) if items.iter().all(FieldValue::is_object) => Self::Records(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        FieldValue::Object(record) => Some(record),
                        _ => None,
                    })
                    .collect(),
            ),
            other => Self::Value(other),
        }
    }

    /// Flatten the answer into a list of records. `Empty` yields no records.
    #[must_use]
    pub fn into_records(self) -> Option<Vec<RemoteRecord>> {
        match self {
            Self::Record(record) => Some(vec![record]),
            Self::Records(records) => Some(records),
            Self::Empty => Some(Vec::new()),
            Self::Flag(_) | Self::Value(_) => None,
        }
    }

    #[must_use]
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) | Self::Value(FieldValue::Bool(flag)) => Some(*flag),
            _ => None,
        }
    }
}

/// Signature of an operation advertised by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMethod {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl ServiceMethod {
    #[must_use]
    pub fn new(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| (*p).to_owned()).collect(),
        }
    }
}

/// Authentication scheme used when talking to endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    #[default]
    Ntlm,
    Basic,
    None,
}

/// Options every connector receives when opening an endpoint.
#[derive(Debug, Default)]
pub struct TransportOptions {
    pub auth: AuthKind,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Proxy URL per scheme, e.g. `http` -> `http://proxy:3128`.
    pub proxy: BTreeMap<String, String>,
    /// Whether connectors may cache endpoint descriptions.
    pub cache: bool,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unscoped_tenant_has_no_scope() {
        let unscoped = TenantId::unscoped();
        assert!(unscoped.is_unscoped());
        assert_eq!(unscoped.scope(), None);
        assert_eq!(unscoped.to_string(), "<unscoped>");

        let tenant = TenantId::from("CRONUS");
        assert_eq!(tenant.scope(), Some("CRONUS"));
    }

    #[test]
    fn remote_key_from_value() {
        assert_eq!(
            RemoteKey::from_value(&json!("12;abc")),
            Some(RemoteKey::from("12;abc"))
        );
        assert_eq!(RemoteKey::from_value(&json!(42)), Some(RemoteKey::from("42")));
        assert_eq!(RemoteKey::from_value(&json!("")), None);
        assert_eq!(RemoteKey::from_value(&json!(null)), None);
    }

    #[test]
    fn response_classification() {
        assert_eq!(
            RemoteResponse::from_value(json!({"No": "1"})),
            RemoteResponse::Record(json!({"No": "1"}).as_object().cloned().unwrap())
        );
        assert!(matches!(
            RemoteResponse::from_value(json!([{"No": "1"}, {"No": "2"}])),
            RemoteResponse::Records(records) if records.len() == 2
        ));
        assert_eq!(RemoteResponse::from_value(json!(true)), RemoteResponse::Flag(true));
        assert_eq!(RemoteResponse::from_value(json!(null)), RemoteResponse::Empty);
        assert!(matches!(
            RemoteResponse::from_value(json!(["CRONUS", "Fabrikam"])),
            RemoteResponse::Value(_)
        ));
    }

    #[test]
    fn filter_condition_serializes_as_triple() {
        let condition = FilterCondition::new("Balance", FilterOp::Gt, 100);
        assert_eq!(
            serde_json::to_value(&condition).unwrap(),
            json!({"field": "Balance", "op": "gt", "value": 100})
        );
    }
}
