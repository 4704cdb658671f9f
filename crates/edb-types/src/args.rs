//! Query arguments.

use crate::value::Value;

/// Arguments for a query, either positional (`$0`, `$1`) or named (`$name`).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArgs {
    /// Positional arguments in order.
    Positional(Vec<Value>),
    /// Named arguments.
    Named(Vec<(String, Value)>),
}

impl QueryArgs {
    /// No arguments.
    #[must_use]
    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }

    /// Named arguments from `(name, value)` pairs.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(v) => v.len(),
            Self::Named(v) => v.len(),
        }
    }

    /// Whether no arguments were given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self::none()
    }
}

impl From<()> for QueryArgs {
    fn from((): ()) -> Self {
        Self::none()
    }
}

impl From<Vec<Value>> for QueryArgs {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

macro_rules! impl_tuple_args {
    ($($name:ident),+) => {
        impl<$($name: Into<Value>),+> From<($($name,)+)> for QueryArgs {
            #[allow(non_snake_case)]
            fn from(($($name,)+): ($($name,)+)) -> Self {
                Self::Positional(vec![$($name.into()),+])
            }
        }
    };
}

impl_tuple_args!(A);
impl_tuple_args!(A, B);
impl_tuple_args!(A, B, C);
impl_tuple_args!(A, B, C, D);
impl_tuple_args!(A, B, C, D, E);
impl_tuple_args!(A, B, C, D, E, F);
impl_tuple_args!(A, B, C, D, E, F, G);
impl_tuple_args!(A, B, C, D, E, F, G, H);
