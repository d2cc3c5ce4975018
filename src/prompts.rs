use crate::store::{load_json, save_json, KeyValueStore, SaveError, CUSTOM_PROMPTS_KEY};
use serde::{Deserialize, Serialize};

pub const MAX_CUSTOM_PROMPTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptPreset {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetError {
    OutOfRange(usize),
    Empty(usize),
}

impl std::fmt::Display for PresetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresetError::OutOfRange(index) => write!(f, "no prompt slot {}", index + 1),
            PresetError::Empty(index) => write!(f, "prompt slot {} has no text", index + 1),
        }
    }
}

impl std::error::Error for PresetError {}

/// Fixed set of [`MAX_CUSTOM_PROMPTS`] user snippets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPresets {
    slots: Vec<PromptPreset>,
}

impl Default for PromptPresets {
    fn default() -> Self {
        Self {
            slots: vec![PromptPreset::default(); MAX_CUSTOM_PROMPTS],
        }
    }
}

impl PromptPresets {
    pub fn from_slots(mut slots: Vec<PromptPreset>) -> Self {
        slots.resize_with(MAX_CUSTOM_PROMPTS, PromptPreset::default);
        Self { slots }
    }

    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Self {
        Self::from_slots(load_json(store, CUSTOM_PROMPTS_KEY).unwrap_or_default())
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) -> Result<(), SaveError> {
        save_json(store, CUSTOM_PROMPTS_KEY, &self.slots)
    }

    pub fn slots(&self) -> &[PromptPreset] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&PromptPreset> {
        self.slots.get(index)
    }

    pub fn set(
        &mut self,
        index: usize,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), PresetError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PresetError::OutOfRange(index))?;
        slot.name = name.into();
        slot.text = text.into();
        Ok(())
    }

    pub fn label(&self, index: usize) -> String {
        match self.slots.get(index) {
            Some(slot) if !slot.name.trim().is_empty() => slot.name.clone(),
            _ => format!("Custom prompt {}", index + 1),
        }
    }

    /// Append the preset's text to `current`, separated by a space unless
    /// `current` is empty.
    pub fn apply(&self, index: usize, current: &str) -> Result<String, PresetError> {
        let slot = self.slots.get(index).ok_or(PresetError::OutOfRange(index))?;
        if slot.text.trim().is_empty() {
            return Err(PresetError::Empty(index));
        }
        if current.is_empty() {
            Ok(slot.text.clone())
        } else {
            Ok(format!("{current} {}", slot.text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn stored_lists_are_normalized_to_four_slots() {
        let mut store = MemoryStore::new();
        store
            .set(CUSTOM_PROMPTS_KEY, r#"[{"name":"a","text":"x"}]"#)
            .unwrap();
        let presets = PromptPresets::load(&store);
        assert_eq!(presets.slots().len(), MAX_CUSTOM_PROMPTS);
        assert_eq!(presets.get(0).unwrap().text, "x");

        let long = (0..6)
            .map(|i| format!(r#"{{"name":"{i}","text":"t{i}"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        store.set(CUSTOM_PROMPTS_KEY, &format!("[{long}]")).unwrap();
        let presets = PromptPresets::load(&store);
        assert_eq!(presets.slots().len(), MAX_CUSTOM_PROMPTS);
        assert_eq!(presets.label(3), "3");
    }

    #[test]
    fn apply_appends_with_a_space() {
        let mut presets = PromptPresets::default();
        presets.set(1, "", "in watercolor").unwrap();
        assert_eq!(presets.apply(1, "a cat").unwrap(), "a cat in watercolor");
        assert_eq!(presets.apply(1, "").unwrap(), "in watercolor");
        assert_eq!(presets.apply(0, "a cat"), Err(PresetError::Empty(0)));
        assert_eq!(presets.apply(9, "a cat"), Err(PresetError::OutOfRange(9)));
        assert_eq!(presets.label(1), "Custom prompt 2");
    }
}
