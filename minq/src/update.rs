use crate::{
    error::{MinqError, Result},
    field::FieldKey,
    filter::FilterChain,
};
use mongodb::bson::{self, Document, doc};
use serde::Serialize;
use std::{collections::HashMap, marker::PhantomData};

/// A set of field mutations compiled from typed field selectors.
///
/// Mutating the same field twice in one chain is rejected by the engine, not
/// locally: true collision detection requires the engine's own validation,
/// so the chain only logs a warning here and the execution path translates
/// the engine's rejection into [`MinqError::WriteConflict`].
#[derive(Debug)]
pub struct UpdateChain<D> {
    sets: Document,
    increments: Document,
    pushes: Document,
    pulls: Document,
    unsets: Document,
    touched: HashMap<String, &'static str>,
    defect: Option<MinqError>,
    _marker: PhantomData<fn(D)>,
}

impl<D> Default for UpdateChain<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> UpdateChain<D> {
    pub(crate) fn new() -> Self {
        Self {
            sets: doc! {},
            increments: doc! {},
            pushes: doc! {},
            pulls: doc! {},
            unsets: doc! {},
            touched: HashMap::new(),
            defect: None,
            _marker: PhantomData,
        }
    }

    pub fn set(&mut self, field: impl FieldKey<D>, value: impl Serialize) -> &mut Self {
        self.mutation("$set", field, value)
    }

    pub fn increment(&mut self, field: impl FieldKey<D>, amount: impl Serialize) -> &mut Self {
        self.mutation("$inc", field, amount)
    }

    /// Appends a value to an array field.
    pub fn push(&mut self, field: impl FieldKey<D>, value: impl Serialize) -> &mut Self {
        self.mutation("$push", field, value)
    }

    /// Removes every element of an array field matching a filter built over
    /// the element type.
    pub fn pull_where<E>(
        &mut self,
        field: impl FieldKey<D>,
        build: impl FnOnce(&mut FilterChain<E>),
    ) -> &mut Self {
        let mut condition = FilterChain::new();
        build(&mut condition);

        if let Some(defect) = condition.take_defect() {
            self.defect.get_or_insert(defect);
            return self;
        }

        let key = field.to_string();
        self.note_touch(&key, "$pull");
        self.pulls.insert(key, condition.build());
        self
    }

    pub fn unset(&mut self, field: impl FieldKey<D>) -> &mut Self {
        let key = field.to_string();
        self.note_touch(&key, "$unset");
        self.unsets.insert(key, 1);
        self
    }

    fn mutation(
        &mut self,
        operator: &'static str,
        field: impl FieldKey<D>,
        value: impl Serialize,
    ) -> &mut Self {
        let key = field.to_string();

        match bson::to_bson(&value) {
            Ok(bson) => {
                self.note_touch(&key, operator);
                let target = match operator {
                    "$set" => &mut self.sets,
                    "$inc" => &mut self.increments,
                    "$push" => &mut self.pushes,
                    _ => unreachable!("unknown mutation operator"),
                };
                target.insert(key, bson);
            }
            Err(error) => {
                self.defect.get_or_insert(error.into());
            }
        }

        self
    }

    fn note_touch(&mut self, key: &str, operator: &'static str) {
        if let Some(previous) = self.touched.insert(key.to_owned(), operator) {
            tracing::warn!(
                field = key,
                first = previous,
                second = operator,
                "the same field is mutated twice in one update chain; the engine will reject this"
            );
        }
    }

    pub(crate) fn take_defect(&mut self) -> Option<MinqError> {
        self.defect.take()
    }

    pub(crate) fn build(&self) -> Result<Document> {
        let mut update = doc! {};

        for (operator, mutations) in [
            ("$set", &self.sets),
            ("$inc", &self.increments),
            ("$push", &self.pushes),
            ("$pull", &self.pulls),
            ("$unset", &self.unsets),
        ] {
            if !mutations.is_empty() {
                update.insert(operator, mutations.clone());
            }
        }

        if update.is_empty() {
            return Err(MinqError::EmptyUpdate);
        }

        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldPath;

    struct Nothing;

    fn path(key: &str) -> FieldPath {
        FieldPath::parse(key).unwrap()
    }

    #[test]
    fn mutations_group_by_operator() {
        let mut chain = UpdateChain::<Nothing>::new();
        chain
            .set(path("name"), "piper")
            .increment(path("score"), 5)
            .unset(path("stale"));

        assert_eq!(
            chain.build().unwrap(),
            doc! {
                "$set": { "name": "piper" },
                "$inc": { "score": 5 },
                "$unset": { "stale": 1 },
            }
        );
    }

    #[test]
    fn pull_where_embeds_element_filter() {
        let mut chain = UpdateChain::<Nothing>::new();
        chain.pull_where::<Nothing>(path("items"), |element| {
            element.greater_than(path("quantity"), 3);
        });

        assert_eq!(
            chain.build().unwrap(),
            doc! { "$pull": { "items": { "quantity": { "$gt": 3 } } } }
        );
    }

    #[test]
    fn empty_chain_refuses_to_build() {
        let chain = UpdateChain::<Nothing>::new();
        assert!(matches!(chain.build(), Err(MinqError::EmptyUpdate)));
    }

    #[test]
    fn same_field_double_mutation_keeps_both_operators() {
        // The engine is the authority on conflicts; both ops must survive so
        // its validation actually sees them.
        let mut chain = UpdateChain::<Nothing>::new();
        chain.set(path("score"), 1).increment(path("score"), 1);

        let update = chain.build().unwrap();
        assert!(update.contains_key("$set"));
        assert!(update.contains_key("$inc"));
    }
}
