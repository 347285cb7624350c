//! Builtin plugins and the static table the registry is seeded from.

pub mod cache;
pub mod upstream;

use crate::registry::PluginEntry;

pub fn builtin() -> Vec<PluginEntry> {
    vec![cache::entry(), upstream::entry()]
}
