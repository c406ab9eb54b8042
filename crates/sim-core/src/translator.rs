//! The address translator: a configurable decoder between a scalar
//! physical address and `(row, col, bank, rank, channel, subarray)`.
//!
//! The low `log2(busWidth/8)` bits address bytes on the bus and the next
//! `log2(busWidth × burstLength / 8) − log2(busWidth/8)` bits address beats
//! within a burst; neither is a scheduling dimension, so both are shifted
//! off before the six fields are peeled in ascending order rank.

use crate::address::{Translated, TranslationField};
use crate::config::ConfigError;
use crate::Request;

/// Floor of log2; 0 for inputs below 2.
#[must_use]
pub fn mlog2(value: u64) -> u32 {
    if value < 2 {
        0
    } else {
        63 - value.leading_zeros()
    }
}

/// Field index in the canonical array order.
fn slot(field: TranslationField) -> usize {
    match field {
        TranslationField::Row => 0,
        TranslationField::Col => 1,
        TranslationField::Bank => 2,
        TranslationField::Rank => 3,
        TranslationField::Channel => 4,
        TranslationField::SubArray => 5,
    }
}

/// Per-field bit widths, ordering and counts.
#[derive(Debug, Clone)]
pub struct TranslationMethod {
    bit_widths: [u32; 6],
    /// Zero-based ordering: 0 = least significant field.
    order: [usize; 6],
    count: [u64; 6],
}

impl Default for TranslationMethod {
    /// The default layout addresses 256 MB as channel:rank:row:bank:
    /// subarray:col from MSB to LSB.
    fn default() -> Self {
        let mut method = Self {
            bit_widths: [0; 6],
            order: [0; 6],
            count: [1; 6],
        };
        method.set_bit_widths(10, 8, 3, 1, 1, 6);
        method
            .set_order(4, 1, 3, 5, 6, 2)
            .expect("default ordering is unique");
        method.set_count(1 << 10, 1 << 8, 1 << 3, 2, 2, 1 << 6);
        method
    }
}

impl TranslationMethod {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bit_widths(
        &mut self,
        row: u32,
        col: u32,
        bank: u32,
        rank: u32,
        channel: u32,
        subarray: u32,
    ) {
        self.bit_widths = [row, col, bank, rank, channel, subarray];
    }

    /// Set the one-based ordering (1 = least significant). Orders must be a
    /// permutation of 1..=6.
    pub fn set_order(
        &mut self,
        row: i32,
        col: i32,
        bank: i32,
        rank: i32,
        channel: i32,
        subarray: i32,
    ) -> Result<(), ConfigError> {
        let orders = [row, col, bank, rank, channel, subarray];
        let mut seen = [false; 6];
        for &order in &orders {
            if !(1..=6).contains(&order) || seen[(order - 1) as usize] {
                return Err(ConfigError::InvalidMapping(format!(
                    "field orders are not a permutation of 1..6: {orders:?}"
                )));
            }
            seen[(order - 1) as usize] = true;
        }
        for (index, &order) in orders.iter().enumerate() {
            self.order[index] = (order - 1) as usize;
        }
        Ok(())
    }

    pub fn set_count(
        &mut self,
        rows: u64,
        cols: u64,
        banks: u64,
        ranks: u64,
        channels: u64,
        subarrays: u64,
    ) {
        self.count = [rows, cols, banks, ranks, channels, subarrays];
    }

    #[must_use]
    pub fn bit_width(&self, field: TranslationField) -> u32 {
        self.bit_widths[slot(field)]
    }

    #[must_use]
    pub fn count(&self, field: TranslationField) -> u64 {
        self.count[slot(field)].max(1)
    }

    /// The field holding zero-based order position `position`.
    fn field_at(&self, position: usize) -> TranslationField {
        for field in TranslationField::ALL {
            if self.order[slot(field)] == position {
                return field;
            }
        }
        // set_order guarantees a permutation.
        unreachable!("field ordering is not a permutation")
    }

    /// Configure the ordering from a colon-separated scheme such as
    /// `"R:RK:BK:CH:C:SA"`, most-significant field first. Fields the scheme
    /// omits fill the remaining low-order slots.
    pub fn set_address_mapping_scheme(&mut self, scheme: &str) -> Result<(), ConfigError> {
        let mut row = 0;
        let mut col = 0;
        let mut bank = 0;
        let mut rank = 0;
        let mut channel = 0;
        let mut subarray = 0;
        let mut current_order = 6i32;

        for token in scheme.split(':').filter(|t| !t.is_empty()) {
            if current_order < 1 {
                return Err(ConfigError::InvalidMapping(format!(
                    "too many fields in mapping scheme `{scheme}`"
                )));
            }
            match token {
                "R" => row = current_order,
                "C" => col = current_order,
                "BK" => bank = current_order,
                "RK" => rank = current_order,
                "CH" => channel = current_order,
                "SA" => subarray = current_order,
                other => {
                    return Err(ConfigError::InvalidMapping(format!(
                        "unrecognized field `{other}` in mapping scheme `{scheme}`"
                    )));
                }
            }
            current_order -= 1;
        }

        // Unspecified fields take the next unused slots, lowest first.
        for unset in [
            &mut subarray,
            &mut channel,
            &mut rank,
            &mut bank,
            &mut row,
            &mut col,
        ] {
            if *unset == 0 {
                *unset = current_order;
                current_order -= 1;
            }
        }

        self.set_order(row, col, bank, rank, channel, subarray)
    }
}

/// Decoder between physical addresses and translated indices.
#[derive(Debug, Clone)]
pub struct AddressTranslator {
    method: TranslationMethod,
    default_field: Option<TranslationField>,
    /// Data bus width in bits.
    bus_width: u64,
    /// Burst length in beats.
    burst_length: u64,
}

impl Default for AddressTranslator {
    fn default() -> Self {
        Self {
            method: TranslationMethod::default(),
            default_field: None,
            // JEDEC-DDR defaults.
            bus_width: 64,
            burst_length: 8,
        }
    }
}

impl AddressTranslator {
    #[must_use]
    pub fn new(method: TranslationMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn method(&self) -> &TranslationMethod {
        &self.method
    }

    pub fn set_method(&mut self, method: TranslationMethod) {
        self.method = method;
    }

    pub fn set_default_field(&mut self, field: Option<TranslationField>) {
        self.default_field = field;
    }

    #[must_use]
    pub fn default_field(&self) -> Option<TranslationField> {
        self.default_field
    }

    pub fn set_bus_width(&mut self, bits: u64) {
        self.bus_width = bits;
    }

    pub fn set_burst_length(&mut self, beats: u64) {
        self.burst_length = beats;
    }

    /// Bits below the lowest scheduling dimension: bus offset plus burst
    /// columns.
    #[must_use]
    pub fn low_bits(&self) -> u32 {
        mlog2((self.bus_width * self.burst_length) / 8)
    }

    /// Decode a physical address into the six indices.
    #[must_use]
    pub fn translate(&self, physical: u64) -> Translated {
        let mut value = physical >> self.low_bits();
        let mut out = Translated::default();

        for position in 0..6 {
            let field = self.method.field_at(position);
            let count = self.method.count(field);
            let index = value % count;
            value /= count;
            match field {
                TranslationField::Row => out.row = index,
                TranslationField::Col => out.col = index,
                TranslationField::Bank => out.bank = index,
                TranslationField::Rank => out.rank = index,
                TranslationField::Channel => out.channel = index,
                TranslationField::SubArray => out.subarray = index,
            }
        }

        out
    }

    /// Recompose a physical address from translated indices. The burst and
    /// bus-offset bits come back zero-filled.
    #[must_use]
    pub fn reverse_translate(&self, indices: &Translated) -> u64 {
        let mut unit = 1u64;
        let mut physical = 0u64;

        for position in 0..6 {
            let field = self.method.field_at(position);
            physical += indices.field(field) * unit;
            unit *= self.method.count(field);
        }

        physical << self.low_bits()
    }

    /// The configured default-field value for a request, translating the
    /// address first if no decoder has seen it. Used for child selection.
    #[must_use]
    pub fn translate_request(&self, req: &Request) -> u64 {
        let Some(field) = self.default_field else {
            return 0;
        };
        let indices = req
            .address
            .translated()
            .unwrap_or_else(|| self.translate(req.address.physical()));
        indices.field(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, ModulePath, OpType};

    fn translator(scheme: &str, widths: (u32, u32, u32, u32, u32, u32)) -> AddressTranslator {
        let (row, col, bank, rank, channel, subarray) = widths;
        let mut method = TranslationMethod::new();
        method.set_bit_widths(row, col, bank, rank, channel, subarray);
        method.set_count(
            1 << row,
            1 << col,
            1 << bank,
            1 << rank,
            1 << channel,
            1 << subarray,
        );
        method
            .set_address_mapping_scheme(scheme)
            .expect("valid scheme");
        AddressTranslator::new(method)
    }

    #[test]
    fn mlog2_matches_floor_log2() {
        assert_eq!(mlog2(1), 0);
        assert_eq!(mlog2(2), 1);
        assert_eq!(mlog2(7), 2);
        assert_eq!(mlog2(8), 3);
        assert_eq!(mlog2(1024), 10);
    }

    #[test]
    fn translates_documented_mapping() {
        // R:RK:BK:CH:C:SA, widths (14, 10, 3, 1, 1, 0): the six bus/burst
        // bits shift off 0x78's low bits, then SA, C, CH, BK, RK, R peel
        // from least significant to most.
        let translator = translator("R:RK:BK:CH:C:SA", (14, 10, 3, 1, 1, 0));
        let indices = translator.translate(0x1234_5678);
        assert_eq!(indices.subarray, 0);
        assert_eq!(indices.col, 0x159);
        assert_eq!(indices.channel, 0);
        assert_eq!(indices.bank, 2);
        assert_eq!(indices.rank, 1);
        assert_eq!(indices.row, 0x91);

        // The low six bits are not preserved; a burst-aligned address is.
        assert_eq!(translator.reverse_translate(&indices), 0x1234_5640);
    }

    #[test]
    fn reverse_translate_inverts_translate_for_aligned_addresses() {
        let translator = translator("R:C:BK:RK:CH:SA", (12, 8, 3, 1, 1, 2));
        for address in [0u64, 0x40, 0x1000, 0xdead_c0, 0x7fff_ffc0] {
            let aligned = address & !((1 << translator.low_bits()) - 1);
            let indices = translator.translate(aligned);
            assert_eq!(
                translator.reverse_translate(&indices),
                aligned,
                "address {aligned:#x}"
            );
        }
    }

    #[test]
    fn partial_scheme_fills_low_slots() {
        // Only R:BK given: they take orders 6 and 5; SA, CH, RK, R, C fill
        // downward, so col lands lowest.
        let mut method = TranslationMethod::new();
        method.set_address_mapping_scheme("R:BK").expect("scheme");
        // Row must be most significant.
        assert_eq!(method.field_at(5), TranslationField::Row);
        assert_eq!(method.field_at(4), TranslationField::Bank);
    }

    #[test]
    fn rejects_unknown_field_token() {
        let mut method = TranslationMethod::new();
        assert!(method.set_address_mapping_scheme("R:XX").is_err());
    }

    #[test]
    fn default_field_selects_child_index() {
        let mut translator = translator("R:C:BK:RK:CH:SA", (12, 8, 3, 1, 1, 0));
        translator.set_default_field(Some(TranslationField::Channel));

        let mut req = Request::new(OpType::Read, Address::new(0), ModulePath::Driver);
        let mut indices = Translated::default();
        indices.channel = 1;
        req.address.set_translated(indices);
        assert_eq!(translator.translate_request(&req), 1);
    }
}
