use strum::{EnumCount, EnumIter};

/// How an indirect object is laid out when the document is saved.
///
/// ## Modes
///
/// - **`Direct`**: inlined at its single point of use, no xref entry
/// - **`Indirect`**: written once as `n 0 obj ... endobj`, addressed by a type 1 xref entry
/// - **`Compressed`**: stored inside an object stream, addressed by a type 2 xref entry
/// - **`Auto`**: resolved at save time from the reference count and the save options
/// - **`Ignore`**: excluded from the index; written as `null` wherever it is used
/// - **`Unknown`**: only exists between reading a file and assigning modes
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Default, EnumIter, EnumCount, strum::Display)]
pub enum SaveMode {
    /// Inline at the point of use
    Direct,
    /// Own object body with an xref entry
    Indirect,
    /// Member of an object stream
    Compressed,
    /// Decided when the index is built
    #[default]
    Auto,
    /// Written as `null`
    Ignore,
    /// Not yet assigned
    Unknown,
}

impl SaveMode {
    /// Returns true for the modes that end up with an xref entry of their own
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        matches!(self, SaveMode::Indirect | SaveMode::Compressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_save_mode_defaults_to_auto() {
        assert_eq!(SaveMode::default(), SaveMode::Auto);
    }

    #[test]
    fn test_save_mode_indexed() {
        let indexed: Vec<SaveMode> = SaveMode::iter().filter(SaveMode::is_indexed).collect();
        assert_eq!(indexed, vec![SaveMode::Indirect, SaveMode::Compressed]);
        assert_eq!(SaveMode::COUNT, 6);
    }

    #[test]
    fn test_save_mode_display() {
        assert_eq!(SaveMode::Compressed.to_string(), "Compressed");
    }
}
