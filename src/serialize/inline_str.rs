//! serde `with`-module for [`Label`] fields: on the wire they are plain
//! strings, the fixed capacity is an in-memory concern only.

use std::fmt;
use std::marker::PhantomData;

use serde::{de::Visitor, Deserializer, Serializer};

use crate::alloc::block::Label;

pub fn serialize<S, const N: usize>(value: &Label<N>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.as_str())
}

pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<Label<N>, D::Error>
where
    D: Deserializer<'de>,
{
    struct V<const N: usize>(PhantomData<[u8; N]>);

    impl<'de, const N: usize> Visitor<'de> for V<N> {
        type Value = Label<N>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a string shorter than {} bytes", N)
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Label::new(v).ok_or_else(|| E::invalid_length(v.len(), &self))
        }
    }

    deserializer.deserialize_str(V::<N>(PhantomData))
}
