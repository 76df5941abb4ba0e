//! The process-wide encoding registry.
//!
//! Seeded with the seven OpenAI encodings, the model-name alias table, and
//! the model-prefix table. All state sits behind one mutex; lookups return
//! snapshots so the lock is never held across loader I/O or encoder
//! construction.

use std::sync::{LazyLock, Mutex, MutexGuard};

use log::{debug, info};
use rustc_hash::{FxHashMap, FxHashSet};

use super::encoder::Encoder;
use super::error::TokenizerError;
use super::loader::{RankSource, SourceFetcher, VocabLoader};
use super::Rank;

/// The built-in segmentation patterns.
pub mod patterns {
    /// gpt2, r50k_base, p50k_base, p50k_edit.
    pub const R50K: &str =
        r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";
    /// cl100k_base.
    pub const CL100K: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";
    /// o200k_base, o200k_harmony.
    pub const O200K: &str = r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n/]*|\s*[\r\n]+|\s+(?!\S)|\s+";
}

const ENDOFTEXT: &str = "<|endoftext|>";
const FIM_PREFIX: &str = "<|fim_prefix|>";
const FIM_MIDDLE: &str = "<|fim_middle|>";
const FIM_SUFFIX: &str = "<|fim_suffix|>";
const ENDOFPROMPT: &str = "<|endofprompt|>";

/// Immutable description of one encoding: everything needed to build an
/// [`Encoder`] once a loader supplies the ranks.
#[derive(Debug, Clone)]
pub struct VocabSpec {
    pub name: String,
    pub pattern: String,
    pub explicit_n_vocab: Option<u32>,
    pub special_tokens: FxHashMap<String, Rank>,
}

impl VocabSpec {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        explicit_n_vocab: Option<u32>,
        special_tokens: FxHashMap<String, Rank>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            explicit_n_vocab,
            special_tokens,
        }
    }
}

/// A bundle of encodings (plus aliases and prefixes) that can be loaded and
/// unloaded as a unit.
#[derive(Debug, Clone)]
pub struct EncodingPlugin {
    pub id: String,
    pub version: String,
    pub summary: String,
    pub encodings: Vec<(VocabSpec, VocabLoader)>,
    pub aliases: Vec<(String, String)>,
    pub prefixes: Vec<(String, String)>,
}

/// What a plugin displaced, so unload can put it back.
#[derive(Debug)]
struct PluginRecord {
    plugin: EncodingPlugin,
    shadowed_encodings: Vec<(String, Option<(VocabSpec, VocabLoader)>)>,
    shadowed_aliases: Vec<(String, Option<String>)>,
    shadowed_prefixes: Vec<(String, Option<String>)>,
}

struct RegistryState {
    encodings: FxHashMap<String, (VocabSpec, VocabLoader)>,
    aliases: FxHashMap<String, String>,
    /// Sorted by descending literal length, then lexicographically, so the
    /// first hit is the longest matching prefix.
    prefixes: Vec<(String, String)>,
    builtin_names: FxHashSet<String>,
    plugins: Vec<PluginRecord>,
}

static REGISTRY: LazyLock<Mutex<RegistryState>> = LazyLock::new(|| Mutex::new(seeded_state()));

fn lock_registry() -> MutexGuard<'static, RegistryState> {
    // The state stays consistent even if a prior holder panicked.
    REGISTRY.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn specials(entries: &[(&str, Rank)]) -> FxHashMap<String, Rank> {
    entries.iter().map(|&(s, id)| (s.to_string(), id)).collect()
}

fn o200k_harmony_specials() -> FxHashMap<String, Rank> {
    let mut map = specials(&[
        ("<|startoftext|>", 199998),
        (ENDOFTEXT, 199999),
        ("<|return|>", 200002),
        ("<|constrain|>", 200003),
        ("<|channel|>", 200005),
        ("<|start|>", 200006),
        ("<|end|>", 200007),
        ("<|message|>", 200008),
        ("<|call|>", 200012),
        (ENDOFPROMPT, 200018),
    ]);
    let named: FxHashSet<Rank> = map.values().copied().collect();
    for id in 200000..=201087 {
        if !named.contains(&id) {
            map.insert(format!("<|reserved_{id}|>"), id);
        }
    }
    map
}

const AZURE_GPT2: &str = "https://openaipublic.blob.core.windows.net/gpt-2/encodings/main";
const AZURE_ENCODINGS: &str = "https://openaipublic.blob.core.windows.net/encodings";

fn builtin_encodings() -> Vec<(VocabSpec, VocabLoader)> {
    let tiktoken_url =
        |file: &str| VocabLoader::TiktokenFile(RankSource::Url(format!("{AZURE_ENCODINGS}/{file}")));
    vec![
        (
            VocabSpec::new("gpt2", patterns::R50K, Some(50257), specials(&[(ENDOFTEXT, 50256)])),
            VocabLoader::DataGym {
                merges: RankSource::Url(format!("{AZURE_GPT2}/vocab.bpe")),
            },
        ),
        (
            VocabSpec::new(
                "r50k_base",
                patterns::R50K,
                Some(50257),
                specials(&[(ENDOFTEXT, 50256)]),
            ),
            tiktoken_url("r50k_base.tiktoken"),
        ),
        (
            VocabSpec::new(
                "p50k_base",
                patterns::R50K,
                Some(50281),
                specials(&[(ENDOFTEXT, 50256)]),
            ),
            tiktoken_url("p50k_base.tiktoken"),
        ),
        (
            VocabSpec::new(
                "p50k_edit",
                patterns::R50K,
                None,
                specials(&[
                    (ENDOFTEXT, 50256),
                    (FIM_PREFIX, 50281),
                    (FIM_MIDDLE, 50282),
                    (FIM_SUFFIX, 50283),
                ]),
            ),
            tiktoken_url("p50k_base.tiktoken"),
        ),
        (
            VocabSpec::new(
                "cl100k_base",
                patterns::CL100K,
                None,
                specials(&[
                    (ENDOFTEXT, 100257),
                    (FIM_PREFIX, 100258),
                    (FIM_MIDDLE, 100259),
                    (FIM_SUFFIX, 100260),
                    (ENDOFPROMPT, 100276),
                ]),
            ),
            tiktoken_url("cl100k_base.tiktoken"),
        ),
        (
            VocabSpec::new(
                "o200k_base",
                patterns::O200K,
                None,
                specials(&[(ENDOFTEXT, 199999), (ENDOFPROMPT, 200018)]),
            ),
            tiktoken_url("o200k_base.tiktoken"),
        ),
        (
            VocabSpec::new("o200k_harmony", patterns::O200K, None, o200k_harmony_specials()),
            tiktoken_url("o200k_base.tiktoken"),
        ),
    ]
}

/// Model name → encoding name.
fn builtin_aliases() -> Vec<(&'static str, &'static str)> {
    vec![
        ("gpt-5.1", "o200k_base"),
        ("gpt-5", "o200k_base"),
        ("gpt-4.5", "o200k_base"),
        ("gpt-4.1", "o200k_base"),
        ("gpt-4o", "o200k_base"),
        ("o1", "o200k_base"),
        ("o3", "o200k_base"),
        ("o4-mini", "o200k_base"),
        ("gpt-oss-120b", "o200k_harmony"),
        ("gpt-oss-20b", "o200k_harmony"),
        ("gpt-4", "cl100k_base"),
        ("gpt-3.5-turbo", "cl100k_base"),
        ("gpt-3.5", "cl100k_base"),
        ("gpt-35-turbo", "cl100k_base"),
        ("davinci-002", "cl100k_base"),
        ("babbage-002", "cl100k_base"),
        ("text-embedding-ada-002", "cl100k_base"),
        ("text-embedding-3-small", "cl100k_base"),
        ("text-embedding-3-large", "cl100k_base"),
        ("text-davinci-003", "p50k_base"),
        ("text-davinci-002", "p50k_base"),
        ("code-davinci-002", "p50k_base"),
        ("code-davinci-001", "p50k_base"),
        ("code-cushman-002", "p50k_base"),
        ("code-cushman-001", "p50k_base"),
        ("davinci-codex", "p50k_base"),
        ("cushman-codex", "p50k_base"),
        ("text-davinci-edit-001", "p50k_edit"),
        ("code-davinci-edit-001", "p50k_edit"),
        ("text-davinci-001", "r50k_base"),
        ("text-curie-001", "r50k_base"),
        ("text-babbage-001", "r50k_base"),
        ("text-ada-001", "r50k_base"),
        ("davinci", "r50k_base"),
        ("curie", "r50k_base"),
        ("babbage", "r50k_base"),
        ("ada", "r50k_base"),
        ("text-similarity-davinci-001", "r50k_base"),
        ("text-similarity-curie-001", "r50k_base"),
        ("text-similarity-babbage-001", "r50k_base"),
        ("text-similarity-ada-001", "r50k_base"),
        ("text-search-davinci-doc-001", "r50k_base"),
        ("text-search-curie-doc-001", "r50k_base"),
        ("text-search-babbage-doc-001", "r50k_base"),
        ("text-search-ada-doc-001", "r50k_base"),
        ("code-search-babbage-code-001", "r50k_base"),
        ("code-search-ada-code-001", "r50k_base"),
        ("gpt-2", "gpt2"),
    ]
}

/// Model-name prefix → encoding name (dated and fine-tuned variants).
fn builtin_prefixes() -> Vec<(&'static str, &'static str)> {
    vec![
        ("gpt-5.1-", "o200k_base"),
        ("gpt-5-", "o200k_base"),
        ("gpt-4.5-", "o200k_base"),
        ("gpt-4.1-", "o200k_base"),
        ("gpt-4o-", "o200k_base"),
        ("chatgpt-4o-", "o200k_base"),
        ("o1-", "o200k_base"),
        ("o3-", "o200k_base"),
        ("o4-mini-", "o200k_base"),
        ("gpt-oss-", "o200k_harmony"),
        ("gpt-4-", "cl100k_base"),
        ("gpt-3.5-turbo-", "cl100k_base"),
        ("gpt-35-turbo-", "cl100k_base"),
        ("ft:gpt-4", "cl100k_base"),
        ("ft:gpt-3.5-turbo", "cl100k_base"),
        ("ft:davinci-002", "cl100k_base"),
        ("ft:babbage-002", "cl100k_base"),
    ]
}

fn sort_prefixes(prefixes: &mut Vec<(String, String)>) {
    prefixes.sort_unstable_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    prefixes.dedup_by(|a, b| a.0 == b.0);
}

fn seeded_state() -> RegistryState {
    let mut encodings = FxHashMap::default();
    let mut builtin_names = FxHashSet::default();
    for (spec, loader) in builtin_encodings() {
        builtin_names.insert(spec.name.clone());
        encodings.insert(spec.name.clone(), (spec, loader));
    }
    let aliases = builtin_aliases()
        .into_iter()
        .map(|(a, n)| (a.to_string(), n.to_string()))
        .collect();
    let mut prefixes: Vec<(String, String)> = builtin_prefixes()
        .into_iter()
        .map(|(p, n)| (p.to_string(), n.to_string()))
        .collect();
    sort_prefixes(&mut prefixes);
    RegistryState {
        encodings,
        aliases,
        prefixes,
        builtin_names,
        plugins: Vec::new(),
    }
}

impl RegistryState {
    fn resolve(&self, identifier: &str) -> Option<(VocabSpec, VocabLoader)> {
        if let Some(entry) = self.encodings.get(identifier) {
            return Some(entry.clone());
        }
        if let Some(name) = self.aliases.get(identifier) {
            return self.encodings.get(name).cloned();
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| identifier.starts_with(prefix.as_str()))
            .and_then(|(_, name)| self.encodings.get(name).cloned())
    }

    fn insert_encoding(
        &mut self,
        spec: VocabSpec,
        loader: VocabLoader,
    ) -> Option<(VocabSpec, VocabLoader)> {
        let name = spec.name.clone();
        // A built-in keeps its loader even when its spec is replaced.
        let loader = if self.builtin_names.contains(&name) {
            self.encodings
                .get(&name)
                .map(|(_, l)| l.clone())
                .unwrap_or(loader)
        } else {
            loader
        };
        self.encodings.insert(name, (spec, loader))
    }

    fn restore_alias(&mut self, alias: &str) {
        match builtin_aliases().iter().find(|(a, _)| *a == alias) {
            Some((_, name)) => {
                self.aliases.insert(alias.to_string(), name.to_string());
            }
            None => {
                self.aliases.remove(alias);
            }
        }
    }

    fn restore_prefix(&mut self, prefix: &str) {
        self.prefixes.retain(|(p, _)| p != prefix);
        if let Some((_, name)) = builtin_prefixes().iter().find(|(p, _)| *p == prefix) {
            self.prefixes.push((prefix.to_string(), name.to_string()));
        }
        sort_prefixes(&mut self.prefixes);
    }
}

/// Register (or replace) an encoding under `spec.name`.
///
/// Replacing a built-in swaps its spec but keeps the built-in loader.
pub fn register(spec: VocabSpec, loader: VocabLoader) {
    let mut state = lock_registry();
    debug!("registering encoding {:?}", spec.name);
    state.insert_encoding(spec, loader);
}

/// Remove a non-built-in encoding. Aliases and prefixes that pointed at it
/// fall back to their built-in mapping, or disappear.
pub fn unregister(name: &str) -> Result<(), TokenizerError> {
    let mut state = lock_registry();
    if state.builtin_names.contains(name) {
        return Err(TokenizerError::BuiltinEncoding(name.to_string()));
    }
    if state.encodings.remove(name).is_none() {
        return Err(TokenizerError::UnknownEncoding(name.to_string()));
    }
    let dangling_aliases: Vec<String> = state
        .aliases
        .iter()
        .filter(|(_, target)| target.as_str() == name)
        .map(|(alias, _)| alias.clone())
        .collect();
    for alias in dangling_aliases {
        state.restore_alias(&alias);
    }
    let dangling_prefixes: Vec<String> = state
        .prefixes
        .iter()
        .filter(|(_, target)| target.as_str() == name)
        .map(|(prefix, _)| prefix.clone())
        .collect();
    for prefix in dangling_prefixes {
        state.restore_prefix(&prefix);
    }
    Ok(())
}

/// Map a model alias onto an encoding name.
pub fn register_alias(alias: impl Into<String>, name: impl Into<String>) {
    lock_registry().aliases.insert(alias.into(), name.into());
}

/// Map a model-name prefix onto an encoding name. Longest prefix wins at
/// resolution time.
pub fn register_prefix(prefix: impl Into<String>, name: impl Into<String>) {
    let mut state = lock_registry();
    let prefix = prefix.into();
    state.prefixes.retain(|(p, _)| *p != prefix);
    state.prefixes.push((prefix, name.into()));
    sort_prefixes(&mut state.prefixes);
}

/// Resolve an identifier (encoding name, model alias, or model-name prefix)
/// to a snapshot of its spec and loader.
pub fn resolve(identifier: &str) -> Option<(VocabSpec, VocabLoader)> {
    lock_registry().resolve(identifier)
}

/// Names of all currently registered encodings.
pub fn list_encoding_names() -> Vec<String> {
    let mut names: Vec<String> = lock_registry().encodings.keys().cloned().collect();
    names.sort_unstable();
    names
}

/// Restore the built-in tables and drop every plugin.
pub fn reset() {
    let mut state = lock_registry();
    *state = seeded_state();
    info!("registry reset to built-ins");
}

/// Load a plugin, registering its encodings, aliases, and prefixes.
pub fn load_plugin(plugin: EncodingPlugin) -> Result<(), TokenizerError> {
    let mut state = lock_registry();
    if state.plugins.iter().any(|p| p.plugin.id == plugin.id) {
        return Err(TokenizerError::PluginDuplicate(plugin.id));
    }
    info!("loading plugin {:?} v{}", plugin.id, plugin.version);

    let mut record = PluginRecord {
        plugin: plugin.clone(),
        shadowed_encodings: Vec::new(),
        shadowed_aliases: Vec::new(),
        shadowed_prefixes: Vec::new(),
    };
    for (spec, loader) in plugin.encodings {
        let name = spec.name.clone();
        let previous = state.insert_encoding(spec, loader);
        record.shadowed_encodings.push((name, previous));
    }
    for (alias, name) in plugin.aliases {
        let previous = state.aliases.insert(alias.clone(), name);
        record.shadowed_aliases.push((alias, previous));
    }
    for (prefix, name) in plugin.prefixes {
        let previous = state
            .prefixes
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, n)| n.clone());
        state.prefixes.retain(|(p, _)| *p != prefix);
        state.prefixes.push((prefix.clone(), name));
        record.shadowed_prefixes.push((prefix, previous));
    }
    sort_prefixes(&mut state.prefixes);
    state.plugins.push(record);
    Ok(())
}

/// Unload a plugin by id, restoring whatever its registrations displaced.
pub fn unload_plugin(id: &str) -> Result<(), TokenizerError> {
    let mut state = lock_registry();
    let index = state
        .plugins
        .iter()
        .position(|p| p.plugin.id == id)
        .ok_or_else(|| TokenizerError::PluginUnknown(id.to_string()))?;
    let record = state.plugins.remove(index);
    info!("unloading plugin {id:?}");

    for (name, previous) in record.shadowed_encodings {
        match previous {
            Some(entry) => {
                state.encodings.insert(name, entry);
            }
            None => {
                state.encodings.remove(&name);
            }
        }
    }
    for (alias, previous) in record.shadowed_aliases {
        match previous {
            Some(name) => {
                state.aliases.insert(alias, name);
            }
            None => {
                state.aliases.remove(&alias);
            }
        }
    }
    for (prefix, previous) in record.shadowed_prefixes {
        state.prefixes.retain(|(p, _)| *p != prefix);
        if let Some(name) = previous {
            state.prefixes.push((prefix, name));
        }
    }
    sort_prefixes(&mut state.prefixes);
    Ok(())
}

/// Ids of the currently loaded plugins, in load order.
pub fn loaded_plugins() -> Vec<String> {
    lock_registry()
        .plugins
        .iter()
        .map(|p| p.plugin.id.clone())
        .collect()
}

/// Build an encoder for an encoding name, model alias, or model prefix.
///
/// The loader runs outside the registry lock; URL-backed built-ins need
/// [`get_encoding_with`] and a fetcher.
pub fn get_encoding(identifier: &str) -> Result<Encoder, TokenizerError> {
    get_encoding_with(identifier, None)
}

/// [`get_encoding`] with a collaborator fetcher for remote rank sources.
pub fn get_encoding_with(
    identifier: &str,
    fetcher: Option<&dyn SourceFetcher>,
) -> Result<Encoder, TokenizerError> {
    let (spec, loader) =
        resolve(identifier).ok_or_else(|| TokenizerError::UnknownEncoding(identifier.to_string()))?;
    let ranks = loader.load_with(fetcher)?;
    Encoder::with_options(
        spec.name,
        ranks,
        spec.special_tokens,
        &spec.pattern,
        spec.explicit_n_vocab,
        4096,
    )
}

/// Build an encoder for a model name (alias or prefix resolution).
pub fn encoding_for_model(model: &str) -> Result<Encoder, TokenizerError> {
    get_encoding(model)
}
