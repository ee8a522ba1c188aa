use crate::field::FieldKey;
use mongodb::bson::Document;
use std::marker::PhantomData;

/// An ordered multi-key sort specification. The first entry is the primary
/// sort key.
///
/// Calling `order_by` twice, or a `then_by` continuation before any primary
/// ordering, is discouraged style rather than an error; the keys keep their
/// positional, first-call-wins semantics either way.
#[derive(Debug)]
pub struct SortChain<D> {
    keys: Vec<(String, i32)>,
    _marker: PhantomData<fn(D)>,
}

impl<D> Default for SortChain<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> SortChain<D> {
    pub(crate) fn new() -> Self {
        Self {
            keys: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn order_by(&mut self, field: impl FieldKey<D>) -> &mut Self {
        self.primary(field, 1)
    }

    pub fn order_by_descending(&mut self, field: impl FieldKey<D>) -> &mut Self {
        self.primary(field, -1)
    }

    pub fn then_by(&mut self, field: impl FieldKey<D>) -> &mut Self {
        self.secondary(field, 1)
    }

    pub fn then_by_descending(&mut self, field: impl FieldKey<D>) -> &mut Self {
        self.secondary(field, -1)
    }

    fn primary(&mut self, field: impl FieldKey<D>, direction: i32) -> &mut Self {
        if !self.keys.is_empty() {
            tracing::warn!("order_by() called after an order_by(); this is discouraged style");
        }

        self.keys.push((field.to_string(), direction));
        self
    }

    fn secondary(&mut self, field: impl FieldKey<D>, direction: i32) -> &mut Self {
        if self.keys.is_empty() {
            tracing::warn!("then_by() called before an order_by(); this is discouraged style");
        }

        self.keys.push((field.to_string(), direction));
        self
    }

    pub(crate) fn build(&self) -> Document {
        self.keys
            .iter()
            .map(|(key, direction)| (key.clone(), (*direction).into()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldPath;
    use mongodb::bson::doc;

    struct Nothing;

    fn path(key: &str) -> FieldPath {
        FieldPath::parse(key).unwrap()
    }

    #[test]
    fn primary_and_secondary_keys_keep_order() {
        let mut chain = SortChain::<Nothing>::new();
        chain
            .order_by_descending(path("score"))
            .then_by(path("name"));

        assert_eq!(chain.build(), doc! { "score": -1, "name": 1 });
    }

    #[test]
    fn misuse_preserves_positional_semantics() {
        let mut chain = SortChain::<Nothing>::new();
        chain.then_by(path("name")).order_by(path("score"));

        assert_eq!(chain.build(), doc! { "name": 1, "score": 1 });
    }
}
