//! Conversion of call arguments into their wire form.

use serde::Serialize;
use serde_json::Value;

use crate::error::{CodecError, Result};

/// Anything that can become an ordered argument list.
///
/// Implemented for `()`, `Vec<Value>` and tuples of up to six serializable values.
pub trait IntoArgs {
    /// Convert into positional arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument cannot be represented as plain data.
    fn into_args(self) -> Result<Vec<Value>>;
}

impl IntoArgs for () {
    fn into_args(self) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>> {
        Ok(self)
    }
}

fn to_arg<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| CodecError::SerializationFailed(e.to_string()).into())
}

macro_rules! impl_into_args {
    ($($name:ident),+) => {
        impl<$($name: Serialize),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Result<Vec<Value>> {
                let ($($name,)+) = self;
                Ok(vec![$(to_arg($name)?),+])
            }
        }
    };
}

impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);
impl_into_args!(A, B, C, D, E);
impl_into_args!(A, B, C, D, E, F);
