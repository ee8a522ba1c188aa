use crate::field::FieldKey;
use futures_util::TryStreamExt;
use mongodb::{
    Collection, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use std::{collections::BTreeSet, marker::PhantomData};

/// Maximum nesting depth for index and string-field discovery through
/// embedded document types. Prevents cycles between embedded types.
pub const MAX_SCAN_DEPTH: u8 = 5;

/// Reserved key the engine uses to mark text indexes in the live catalog.
const TEXT_SENTINEL: &str = "_fts";

/// One index intent declared on a single field. Fragments are raw material:
/// [`combine`] merges them into complete [`MinqIndex`] descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexFragment {
    Simple {
        key: String,
        unique: bool,
        ascending: bool,
    },
    CompoundKey {
        group: String,
        key: String,
        priority: i32,
        ascending: bool,
    },
    Text {
        key: String,
    },
}

/// A complete, declarative index descriptor ready for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinqIndex {
    Simple {
        key: String,
        unique: bool,
        ascending: bool,
        name: Option<String>,
    },
    Compound {
        name: String,
        keys: Vec<(String, bool)>,
    },
    Text {
        keys: Vec<String>,
    },
}

/// Merges raw fragments into complete descriptors:
///
/// - simple fragments pass through unchanged;
/// - compound fragments sharing a group name merge into one multi-key
///   descriptor ordered by declared priority;
/// - text fragments across all fields merge into exactly one text
///   descriptor, since a collection supports at most one text index.
pub fn combine(fragments: Vec<IndexFragment>) -> Vec<MinqIndex> {
    let mut output = Vec::new();
    let mut groups: Vec<(String, Vec<(String, i32, bool)>)> = Vec::new();
    let mut text_keys = Vec::new();

    for fragment in fragments {
        match fragment {
            IndexFragment::Simple {
                key,
                unique,
                ascending,
            } => output.push(MinqIndex::Simple {
                key,
                unique,
                ascending,
                name: None,
            }),
            IndexFragment::CompoundKey {
                group,
                key,
                priority,
                ascending,
            } => match groups.iter_mut().find(|(name, _)| *name == group) {
                Some((_, keys)) => keys.push((key, priority, ascending)),
                None => groups.push((group, vec![(key, priority, ascending)])),
            },
            IndexFragment::Text { key } => {
                if !text_keys.contains(&key) {
                    text_keys.push(key);
                }
            }
        }
    }

    for (name, mut keys) in groups {
        keys.sort_by_key(|(_, priority, _)| *priority);
        output.push(MinqIndex::Compound {
            name,
            keys: keys
                .into_iter()
                .map(|(key, _, ascending)| (key, ascending))
                .collect(),
        });
    }

    if !text_keys.is_empty() {
        output.push(MinqIndex::Text { keys: text_keys });
    }

    output
}

/// One index as read back from the collection's live catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveIndex {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
}

impl LiveIndex {
    pub(crate) fn from_model(model: &IndexModel) -> Self {
        let options = model.options.as_ref();

        Self {
            name: options
                .and_then(|options| options.name.clone())
                .unwrap_or_else(|| default_name(&model.keys)),
            keys: model.keys.clone(),
            unique: options.and_then(|options| options.unique).unwrap_or(false),
        }
    }

    pub fn is_text(&self) -> bool {
        self.keys.get_str(TEXT_SENTINEL) == Ok("text")
    }

    pub fn is_simple(&self) -> bool {
        !self.is_text() && self.keys.len() == 1
    }

    pub fn is_compound(&self) -> bool {
        !self.is_text() && self.keys.len() > 1
    }

    fn first_key(&self) -> Option<&str> {
        self.keys.keys().next().map(String::as_str)
    }

    fn key_names(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

// The server's own naming convention, used when a live index somehow comes
// back nameless.
fn default_name(keys: &Document) -> String {
    keys.iter()
        .map(|(key, direction)| format!("{key}_{direction}"))
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IndexAction {
    Drop { name: String },
    Create { index: MinqIndex },
}

/// Diffs desired descriptors against the live catalog and returns the
/// minimal ordered set of drop/create operations. Running the resulting
/// plan and planning again yields an empty plan.
pub(crate) fn plan(desired: &[MinqIndex], live: &[LiveIndex]) -> Vec<IndexAction> {
    let mut actions = Vec::new();

    for index in desired {
        match index {
            MinqIndex::Simple {
                key,
                unique,
                ascending,
                ..
            } => {
                match live
                    .iter()
                    .find(|live| live.is_simple() && live.first_key() == Some(key.as_str()))
                {
                    // A live simple index already covers the key; recreate
                    // only if the uniqueness flag disagrees, reusing the
                    // original name to avoid churn in tooling.
                    Some(existing) => {
                        if existing.unique != *unique {
                            actions.push(IndexAction::Drop {
                                name: existing.name.clone(),
                            });
                            actions.push(IndexAction::Create {
                                index: MinqIndex::Simple {
                                    key: key.clone(),
                                    unique: *unique,
                                    ascending: *ascending,
                                    name: Some(existing.name.clone()),
                                },
                            });
                        }
                    }
                    None => actions.push(IndexAction::Create {
                        index: index.clone(),
                    }),
                }
            }
            MinqIndex::Compound { name, keys } => {
                match live.iter().find(|live| live.name == *name) {
                    Some(existing) => {
                        let desired_keys: BTreeSet<&str> =
                            keys.iter().map(|(key, _)| key.as_str()).collect();
                        let existing_keys: BTreeSet<&str> = existing.key_names().collect();

                        if desired_keys != existing_keys {
                            actions.push(IndexAction::Drop {
                                name: existing.name.clone(),
                            });
                            actions.push(IndexAction::Create {
                                index: MinqIndex::Compound {
                                    name: existing.name.clone(),
                                    keys: keys.clone(),
                                },
                            });
                        }
                    }
                    None => actions.push(IndexAction::Create {
                        index: index.clone(),
                    }),
                }
            }
            // At most one text index is permitted; never alter an existing
            // one automatically.
            MinqIndex::Text { .. } => {
                if !live.iter().any(LiveIndex::is_text) {
                    actions.push(IndexAction::Create {
                        index: index.clone(),
                    });
                }
            }
        }
    }

    actions
}

fn to_index_model(index: &MinqIndex) -> IndexModel {
    match index {
        MinqIndex::Simple {
            key,
            unique,
            ascending,
            name,
        } => {
            let mut key_document = doc! {};
            key_document.insert(key.as_str(), if *ascending { 1 } else { -1 });

            let mut options = IndexOptions::builder()
                .background(true)
                .unique(*unique)
                .build();
            options.name = name.clone();

            IndexModel::builder()
                .keys(key_document)
                .options(options)
                .build()
        }
        MinqIndex::Compound { name, keys } => {
            let mut key_document = doc! {};
            for (key, ascending) in keys {
                key_document.insert(key.as_str(), if *ascending { 1 } else { -1 });
            }

            let mut options = IndexOptions::builder().background(true).build();
            options.name = Some(name.clone());

            IndexModel::builder().keys(key_document).options(options).build()
        }
        MinqIndex::Text { keys } => {
            let mut key_document = doc! {};
            for key in keys {
                key_document.insert(key.as_str(), "text");
            }

            let mut options = IndexOptions::builder().background(true).build();
            options.name = Some("text".to_owned());

            IndexModel::builder().keys(key_document).options(options).build()
        }
    }
}

/// Reconciles a collection's live index catalog against the desired
/// descriptors. Every drop and create is independently guarded: a failure
/// on one descriptor is logged and does not abort the rest, and nothing
/// propagates to the caller.
pub(crate) async fn reconcile<T: Send + Sync>(collection: &Collection<T>, desired: &[MinqIndex]) {
    if desired.is_empty() {
        return;
    }

    let namespace = collection.namespace().to_string();

    let live = match fetch_live(collection).await {
        Ok(live) => live,
        Err(error) => {
            tracing::error!(
                collection = namespace,
                error = %error,
                "unable to list indexes; skipping reconciliation for this collection"
            );
            return;
        }
    };

    for action in plan(desired, &live) {
        match action {
            IndexAction::Drop { name } => match collection.drop_index(name.as_str()).await {
                Ok(()) => tracing::warn!(
                    index = name,
                    collection = namespace,
                    "Mongo index dropped; if this is not rare, treat it as an error"
                ),
                Err(error) => tracing::error!(
                    index = name,
                    collection = namespace,
                    error = %error,
                    "unable to drop index"
                ),
            },
            IndexAction::Create { index } => {
                if let Err(error) = collection.create_index(to_index_model(&index)).await {
                    tracing::error!(
                        collection = namespace,
                        error = %error,
                        ?index,
                        "unable to create index"
                    );
                }
            }
        }
    }
}

async fn fetch_live<T: Send + Sync>(
    collection: &Collection<T>,
) -> mongodb::error::Result<Vec<LiveIndex>> {
    let models: Vec<IndexModel> = collection.list_indexes().await?.try_collect().await?;

    Ok(models.iter().map(LiveIndex::from_model).collect())
}

/// Fluent builder for a manually-declared index, passed as a closure to
/// [`Minq::create_index`](crate::Minq::create_index). Key order matters for
/// multi-key indexes.
#[derive(Debug)]
pub struct IndexChain<D> {
    keys: Vec<(String, bool)>,
    unique: bool,
    name: Option<String>,
    _marker: PhantomData<fn(D)>,
}

impl<D> Default for IndexChain<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> IndexChain<D> {
    pub(crate) fn new() -> Self {
        Self {
            keys: Vec::new(),
            unique: false,
            name: None,
            _marker: PhantomData,
        }
    }

    pub fn add(&mut self, field: impl FieldKey<D>) -> &mut Self {
        self.keys.push((field.to_string(), true));
        self
    }

    pub fn add_descending(&mut self, field: impl FieldKey<D>) -> &mut Self {
        self.keys.push((field.to_string(), false));
        self
    }

    /// Adds a unique constraint. If the index already exists without one,
    /// reconciliation will drop and recreate it.
    pub fn enforce_unique_constraint(&mut self) -> &mut Self {
        if self.unique {
            tracing::warn!("the index definition is already marked as unique; remove the extra call");
        }

        self.unique = true;
        self
    }

    /// Names the index. If the name is already in use and the keys don't
    /// match, the existing index is dropped and this one takes its place.
    pub fn set_name(&mut self, name: &str) -> &mut Self {
        if self.name.is_some() {
            tracing::warn!("the index name was already specified; remove the extra call");
        }

        self.name = Some(name.to_owned());
        self
    }

    pub(crate) fn build(mut self) -> Option<MinqIndex> {
        match self.keys.len() {
            0 => {
                tracing::warn!("the index chain defines no keys and will be ignored");
                None
            }
            1 => {
                let (key, ascending) = self.keys.remove(0);
                Some(MinqIndex::Simple {
                    key,
                    unique: self.unique,
                    ascending,
                    name: self.name,
                })
            }
            _ => {
                if self.unique {
                    tracing::warn!(
                        "unique constraints are not supported on multi-key index definitions; ignoring"
                    );
                }

                let name = self.name.unwrap_or_else(|| {
                    self.keys
                        .iter()
                        .map(|(key, _)| key.as_str())
                        .collect::<Vec<_>>()
                        .join("_")
                });

                Some(MinqIndex::Compound {
                    name,
                    keys: self.keys,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(name: &str, keys: Document, unique: bool) -> LiveIndex {
        LiveIndex {
            name: name.to_owned(),
            keys,
            unique,
        }
    }

    #[test]
    fn combine_merges_compound_fragments_by_priority() {
        let descriptors = combine(vec![
            IndexFragment::CompoundKey {
                group: "leaderboard".into(),
                key: "score".into(),
                priority: 2,
                ascending: false,
            },
            IndexFragment::Simple {
                key: "email".into(),
                unique: true,
                ascending: true,
            },
            IndexFragment::CompoundKey {
                group: "leaderboard".into(),
                key: "season".into(),
                priority: 1,
                ascending: true,
            },
        ]);

        assert_eq!(
            descriptors,
            vec![
                MinqIndex::Simple {
                    key: "email".into(),
                    unique: true,
                    ascending: true,
                    name: None,
                },
                MinqIndex::Compound {
                    name: "leaderboard".into(),
                    keys: vec![("season".into(), true), ("score".into(), false)],
                },
            ]
        );
    }

    #[test]
    fn combine_merges_all_text_fragments_into_one_descriptor() {
        let descriptors = combine(vec![
            IndexFragment::Text { key: "name".into() },
            IndexFragment::Text { key: "bio".into() },
        ]);

        assert_eq!(
            descriptors,
            vec![MinqIndex::Text {
                keys: vec!["name".into(), "bio".into()],
            }]
        );
    }

    #[test]
    fn plan_recreates_simple_index_when_uniqueness_differs() {
        let desired = vec![MinqIndex::Simple {
            key: "email".into(),
            unique: true,
            ascending: true,
            name: None,
        }];
        let catalog = vec![live("email_1", doc! { "email": 1 }, false)];

        assert_eq!(
            plan(&desired, &catalog),
            vec![
                IndexAction::Drop {
                    name: "email_1".into(),
                },
                IndexAction::Create {
                    index: MinqIndex::Simple {
                        key: "email".into(),
                        unique: true,
                        ascending: true,
                        name: Some("email_1".into()),
                    },
                },
            ]
        );
    }

    #[test]
    fn plan_skips_satisfied_simple_index() {
        let desired = vec![MinqIndex::Simple {
            key: "email".into(),
            unique: true,
            ascending: true,
            name: None,
        }];
        let catalog = vec![live("email_1", doc! { "email": 1 }, true)];

        assert!(plan(&desired, &catalog).is_empty());
    }

    #[test]
    fn plan_recreates_compound_index_on_key_set_difference() {
        let desired = vec![MinqIndex::Compound {
            name: "leaderboard".into(),
            keys: vec![("season".into(), true), ("score".into(), false)],
        }];
        let catalog = vec![live("leaderboard", doc! { "season": 1, "rank": -1 }, false)];

        assert_eq!(
            plan(&desired, &catalog),
            vec![
                IndexAction::Drop {
                    name: "leaderboard".into(),
                },
                IndexAction::Create {
                    index: desired[0].clone(),
                },
            ]
        );
    }

    #[test]
    fn plan_never_touches_an_existing_text_index() {
        let desired = vec![MinqIndex::Text {
            keys: vec!["name".into(), "bio".into()],
        }];
        let catalog = vec![live(
            "text",
            doc! { "_fts": "text", "_ftsx": 1 },
            false,
        )];

        assert!(plan(&desired, &catalog).is_empty());
    }

    #[test]
    fn plan_is_idempotent_after_a_clean_run() {
        let desired = combine(vec![
            IndexFragment::Simple {
                key: "email".into(),
                unique: true,
                ascending: true,
            },
            IndexFragment::CompoundKey {
                group: "leaderboard".into(),
                key: "season".into(),
                priority: 1,
                ascending: true,
            },
            IndexFragment::Text { key: "name".into() },
        ]);

        // Simulate the catalog after the first run applied every create.
        let catalog = vec![
            live("email_1", doc! { "email": 1 }, true),
            live("leaderboard", doc! { "season": 1 }, false),
            live("text", doc! { "_fts": "text", "_ftsx": 1 }, false),
        ];

        assert!(plan(&desired, &catalog).is_empty());
    }

    #[test]
    fn live_index_classification() {
        assert!(live("text", doc! { "_fts": "text", "_ftsx": 1 }, false).is_text());
        assert!(live("email_1", doc! { "email": 1 }, false).is_simple());
        assert!(live("pair", doc! { "a": 1, "b": -1 }, false).is_compound());
        assert!(!live("pair", doc! { "a": 1, "b": -1 }, false).is_simple());
    }
}
