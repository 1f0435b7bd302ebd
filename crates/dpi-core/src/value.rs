//! Property and argument values.

/// A value crossing the DPI boundary, generic over how objects are held.
///
/// The client side holds objects as proxies, the worker side as hosted
/// objects, and the property cache as bare handles.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<O> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value<O>>),
    Object(O),
}

impl<O> Value<O> {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&O> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_object(self) -> Option<O> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_list(self) -> Option<Vec<Self>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short label of the variant, for shape-mismatch messages.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    /// Convert every object in the value, stopping at the first error.
    ///
    /// `convert` is only called for object entries.
    pub fn try_map<P, E, F>(self, convert: &mut F) -> Result<Value<P>, E>
    where
        F: FnMut(O) -> Result<P, E>,
    {
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(flag) => Value::Bool(flag),
            Self::Int(n) => Value::Int(n),
            Self::Float(n) => Value::Float(n),
            Self::Text(text) => Value::Text(text),
            Self::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| item.try_map(convert))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Object(object) => Value::Object(convert(object)?),
        })
    }
}

impl<O> From<&str> for Value<O> {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl<O> From<String> for Value<O> {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl<O> From<i64> for Value<O> {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl<O> From<bool> for Value<O> {
    fn from(flag: bool) -> Self {
        Self::Bool(flag)
    }
}

impl<O> From<f64> for Value<O> {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl<O> From<Option<O>> for Value<O> {
    fn from(object: Option<O>) -> Self {
        object.map_or(Self::Null, Self::Object)
    }
}
