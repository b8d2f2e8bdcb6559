//! XML-RPC request encoding and response decoding.
//!
//! Supports the value types supervisor emits. Method calls are rendered as
//! strings; responses are decoded into a [`MethodResponse`] that is either a
//! single return [`Value`] or a fault.

mod tree;

use std::collections::BTreeMap;

use thiserror::Error;

use self::tree::{Element, escape, parse};

/// A decoded XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `<string>` or an untyped value.
    String(String),
    /// `<int>`, `<i4>` or `<i8>`.
    Int(i64),
    /// `<boolean>`.
    Boolean(bool),
    /// `<double>`, kept in its textual form.
    Double(String),
    /// `<dateTime.iso8601>`, kept in its textual form.
    DateTime(String),
    /// `<base64>`, kept encoded.
    Base64(String),
    /// `<array>`.
    Array(Vec<Value>),
    /// `<struct>`.
    Struct(BTreeMap<String, Value>),
    /// `<nil/>`.
    Nil,
}

impl Value {
    /// Returns the string payload when the value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the integer payload when the value is an integer.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(number) => Some(*number),
            _ => None,
        }
    }

    /// Returns the boolean payload when the value is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Returns the members when the value is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the members when the value is a struct.
    #[must_use]
    pub const fn as_struct(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Name of the XML-RPC type, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Boolean(_) => "boolean",
            Self::Double(_) => "double",
            Self::DateTime(_) => "dateTime.iso8601",
            Self::Base64(_) => "base64",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
            Self::Nil => "nil",
        }
    }

    fn write_xml(&self, output: &mut String) {
        output.push_str("<value>");
        match self {
            Self::String(text) => {
                output.push_str(&format!("<string>{}</string>", escape(text)));
            }
            Self::Int(number) => {
                output.push_str(&format!("<int>{number}</int>"));
            }
            Self::Boolean(flag) => {
                output.push_str(&format!("<boolean>{}</boolean>", u8::from(*flag)));
            }
            Self::Double(text) => {
                output.push_str(&format!("<double>{}</double>", escape(text)));
            }
            Self::DateTime(text) => {
                output.push_str(&format!(
                    "<dateTime.iso8601>{}</dateTime.iso8601>",
                    escape(text)
                ));
            }
            Self::Base64(text) => {
                output.push_str(&format!("<base64>{}</base64>", escape(text)));
            }
            Self::Array(items) => {
                output.push_str("<array><data>");
                for item in items {
                    item.write_xml(output);
                }
                output.push_str("</data></array>");
            }
            Self::Struct(members) => {
                output.push_str("<struct>");
                for (name, value) in members {
                    output.push_str(&format!("<member><name>{}</name>", escape(name)));
                    value.write_xml(output);
                    output.push_str("</member>");
                }
                output.push_str("</struct>");
            }
            Self::Nil => output.push_str("<nil/>"),
        }
        output.push_str("</value>");
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::String(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::String(text)
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Self::Int(number)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Self::Boolean(flag)
    }
}

/// Outcome of a decoded method call.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    /// The call returned a value.
    Success(Value),
    /// The call raised a fault.
    Fault {
        /// Numeric fault code.
        code: i64,
        /// Fault string.
        message: String,
    },
}

/// Errors raised while decoding XML-RPC documents.
#[derive(Debug, Error)]
pub enum XmlRpcError {
    /// The document is not well-formed XML.
    #[error("invalid XML: {0}")]
    Xml(#[from] xmlparser::Error),
    /// The document is XML but structurally broken.
    #[error("malformed document: {0}")]
    Malformed(String),
    /// A required element is absent.
    #[error("<{parent}> is missing <{expected}>")]
    MissingElement {
        /// Element that should contain the child.
        parent: String,
        /// Expected child element.
        expected: String,
    },
    /// An element that cannot appear inside `<value>`.
    #[error("unsupported value type <{0}>")]
    UnsupportedType(String),
    /// A scalar could not be parsed.
    #[error("invalid {kind} literal '{literal}'")]
    InvalidLiteral {
        /// XML-RPC type of the literal.
        kind: &'static str,
        /// Offending text.
        literal: String,
    },
    /// The fault struct lacked `faultCode` or `faultString`.
    #[error("fault struct is missing {0}")]
    MalformedFault(&'static str),
}

/// Renders a `<methodCall>` document.
///
/// # Examples
///
/// ```
/// use rubber_supervisor::xmlrpc::{Value, encode_call};
///
/// let body = encode_call("supervisor.startProcess", &[Value::from("foo")]);
/// assert!(body.contains("<methodName>supervisor.startProcess</methodName>"));
/// assert!(body.contains("<string>foo</string>"));
/// ```
#[must_use]
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut output = String::from("<?xml version=\"1.0\"?>\n<methodCall>");
    output.push_str(&format!("<methodName>{}</methodName><params>", escape(method)));
    for param in params {
        output.push_str("<param>");
        param.write_xml(&mut output);
        output.push_str("</param>");
    }
    output.push_str("</params></methodCall>");
    output
}

/// Renders a successful `<methodResponse>` carrying `value`.
#[must_use]
pub fn encode_success(value: &Value) -> String {
    let mut output = String::from("<?xml version=\"1.0\"?>\n<methodResponse><params><param>");
    value.write_xml(&mut output);
    output.push_str("</param></params></methodResponse>");
    output
}

/// Renders a fault `<methodResponse>`.
#[must_use]
pub fn encode_fault(code: i64, message: &str) -> String {
    let members = BTreeMap::from([
        (String::from("faultCode"), Value::Int(code)),
        (String::from("faultString"), Value::from(message)),
    ]);
    let mut output = String::from("<?xml version=\"1.0\"?>\n<methodResponse><fault>");
    Value::Struct(members).write_xml(&mut output);
    output.push_str("</fault></methodResponse>");
    output
}

/// Decodes a `<methodCall>` document into its method name and parameters.
///
/// # Errors
///
/// Returns [`XmlRpcError`] when the document is not a well-formed call.
pub fn decode_call(body: &str) -> Result<(String, Vec<Value>), XmlRpcError> {
    let root = parse(body)?;
    if root.name != "methodCall" {
        return Err(XmlRpcError::Malformed(format!(
            "expected <methodCall> but found <{}>",
            root.name
        )));
    }
    let method = root.expect_child("methodName")?.text.trim().to_owned();
    let params = match root.child("params") {
        Some(params) => params
            .children_named("param")
            .map(|param| decode_value(param.expect_child("value")?))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok((method, params))
}

/// Decodes a `<methodResponse>` document.
///
/// # Errors
///
/// Returns [`XmlRpcError`] when the document is not a well-formed response.
pub fn decode_response(body: &str) -> Result<MethodResponse, XmlRpcError> {
    let root = parse(body)?;
    if root.name != "methodResponse" {
        return Err(XmlRpcError::Malformed(format!(
            "expected <methodResponse> but found <{}>",
            root.name
        )));
    }

    if let Some(fault) = root.child("fault") {
        return decode_fault(fault);
    }

    let value = root
        .expect_child("params")?
        .expect_child("param")?
        .expect_child("value")?;
    decode_value(value).map(MethodResponse::Success)
}

fn decode_fault(fault: &Element) -> Result<MethodResponse, XmlRpcError> {
    let value = decode_value(fault.expect_child("value")?)?;
    let members = value
        .as_struct()
        .ok_or(XmlRpcError::MalformedFault("struct payload"))?;
    let code = members
        .get("faultCode")
        .and_then(Value::as_int)
        .ok_or(XmlRpcError::MalformedFault("faultCode"))?;
    let message = members
        .get("faultString")
        .and_then(Value::as_str)
        .ok_or(XmlRpcError::MalformedFault("faultString"))?
        .to_owned();
    Ok(MethodResponse::Fault { code, message })
}

fn decode_value(value: &Element) -> Result<Value, XmlRpcError> {
    let Some(typed) = value.children.first() else {
        return Ok(Value::String(value.text.clone()));
    };

    match typed.name.as_str() {
        "string" => Ok(Value::String(typed.text.clone())),
        "int" | "i4" | "i8" => {
            let literal = typed.text.trim();
            literal
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| XmlRpcError::InvalidLiteral {
                    kind: "int",
                    literal: literal.to_owned(),
                })
        }
        "boolean" => match typed.text.trim() {
            "1" => Ok(Value::Boolean(true)),
            "0" => Ok(Value::Boolean(false)),
            other => Err(XmlRpcError::InvalidLiteral {
                kind: "boolean",
                literal: other.to_owned(),
            }),
        },
        "double" => Ok(Value::Double(typed.text.trim().to_owned())),
        "dateTime.iso8601" => Ok(Value::DateTime(typed.text.trim().to_owned())),
        "base64" => Ok(Value::Base64(typed.text.trim().to_owned())),
        "nil" => Ok(Value::Nil),
        "array" => typed
            .expect_child("data")?
            .children_named("value")
            .map(decode_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "struct" => typed
            .children_named("member")
            .map(|member| {
                let name = member.expect_child("name")?.text.clone();
                let member_value = decode_value(member.expect_child("value")?)?;
                Ok((name, member_value))
            })
            .collect::<Result<BTreeMap<_, _>, XmlRpcError>>()
            .map(Value::Struct),
        other => Err(XmlRpcError::UnsupportedType(other.to_owned())),
    }
}
