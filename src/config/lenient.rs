//! Scalar coercion for fields that may arrive as strings after env substitution.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr<T> {
    Typed(T),
    Text(String),
}

fn coerce<T, E>(repr: Repr<T>) -> Result<T, E>
where
    T: FromStr,
    T::Err: Display,
    E: serde::de::Error,
{
    match repr {
        Repr::Typed(value) => Ok(value),
        Repr::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| E::custom(format!("cannot coerce '{text}': {e}"))),
    }
}

pub fn value<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    coerce(Repr::<T>::deserialize(deserializer)?)
}

pub fn option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    match Option::<Repr<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Repr::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(repr) => coerce(repr).map(Some),
    }
}
