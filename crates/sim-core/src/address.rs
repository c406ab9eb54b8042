//! Physical and translated addresses.

/// One of the six decoded address fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslationField {
    Row,
    Col,
    Bank,
    Rank,
    Channel,
    SubArray,
}

impl TranslationField {
    /// All fields, in the canonical (row, col, bank, rank, channel,
    /// subarray) order used for array indexing.
    pub const ALL: [Self; 6] = [
        Self::Row,
        Self::Col,
        Self::Bank,
        Self::Rank,
        Self::Channel,
        Self::SubArray,
    ];
}

/// The six decoded indices of a physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Translated {
    pub row: u64,
    pub col: u64,
    pub bank: u64,
    pub rank: u64,
    pub channel: u64,
    pub subarray: u64,
}

impl Translated {
    #[must_use]
    pub fn field(&self, field: TranslationField) -> u64 {
        match field {
            TranslationField::Row => self.row,
            TranslationField::Col => self.col,
            TranslationField::Bank => self.bank,
            TranslationField::Rank => self.rank,
            TranslationField::Channel => self.channel,
            TranslationField::SubArray => self.subarray,
        }
    }
}

/// Address of a request: the scalar physical address, plus the decoded
/// indices once a translator has seen it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Address {
    physical: u64,
    translated: Option<Translated>,
}

impl Address {
    #[must_use]
    pub fn new(physical: u64) -> Self {
        Self {
            physical,
            translated: None,
        }
    }

    /// Address already carrying its decoded indices (synthesized commands).
    #[must_use]
    pub fn with_translation(physical: u64, translated: Translated) -> Self {
        Self {
            physical,
            translated: Some(translated),
        }
    }

    #[must_use]
    pub fn physical(&self) -> u64 {
        self.physical
    }

    pub fn set_physical(&mut self, physical: u64) {
        self.physical = physical;
        self.translated = None;
    }

    pub fn set_translated(&mut self, translated: Translated) {
        self.translated = Some(translated);
    }

    #[must_use]
    pub fn is_translated(&self) -> bool {
        self.translated.is_some()
    }

    #[must_use]
    pub fn translated(&self) -> Option<Translated> {
        self.translated
    }

    /// Decoded indices; panics if no translator has seen this address yet.
    #[must_use]
    pub fn indices(&self) -> Translated {
        self.translated
            .expect("address used before translation")
    }
}
