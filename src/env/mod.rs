use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type EnvMap = HashMap<String, String>;

mod globals;
#[cfg(feature = "cli")]
mod loader;
mod placeholders;
mod tracker;

pub use globals::GlobalStore;
#[cfg(feature = "cli")]
pub use loader::load_environment;
pub use placeholders::{build_variable_map, expand_placeholders};
pub use tracker::{replay_changes, ChangeKind, EnvChange, MutationTracker};

/// A named set of variables, as handed over by the environment store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub variables: EnvMap,
}

impl Environment {
    pub fn new(name: impl Into<String>, variables: EnvMap) -> Self {
        Self {
            name: name.into(),
            variables,
        }
    }
}
