//! Static catalogue of dangerous 4-byte function selectors.
//!
//! Labels and weights are part of the external contract: downstream drift
//! detection keys on the flag strings these produce, so entries are never
//! renamed or reweighted without a catalogue version bump.

/// One known-dangerous selector with its display label and risk weight.
#[derive(Debug, Clone, Copy)]
pub struct SelectorEntry {
    pub label: &'static str,
    pub selector: [u8; 4],
    pub weight: u8,
}

impl SelectorEntry {
    const fn new(label: &'static str, selector: [u8; 4], weight: u8) -> Self {
        Self {
            label,
            selector,
            weight,
        }
    }
}

pub const SELECTOR_TABLE: &[SelectorEntry] = &[
    SelectorEntry::new("blacklist(address)", [0xf9, 0xf9, 0x2b, 0xe4], 50),
    SelectorEntry::new("pause()", [0x84, 0x56, 0xcb, 0x59], 30),
    SelectorEntry::new("_pause()", [0x2f, 0x2b, 0x38, 0x87], 30),
    SelectorEntry::new("enableTrading()", [0x8a, 0x8c, 0x52, 0x3c], 20),
    SelectorEntry::new("openTrading()", [0xc9, 0x04, 0x4b, 0x7d], 20),
    SelectorEntry::new("setFee(uint256)", [0x69, 0xfe, 0x0e, 0x2d], 25),
    SelectorEntry::new("setTaxFeePercent(uint256)", [0x06, 0x1c, 0x82, 0xd0], 25),
    SelectorEntry::new("setMarketingFee(uint256)", [0x23, 0x23, 0xcc, 0x66], 20),
    SelectorEntry::new("updateFees(uint256,uint256)", [0x37, 0xb8, 0xd8, 0x0f], 20),
    SelectorEntry::new("mint(address,uint256)", [0x40, 0xc1, 0x0f, 0x19], 60),
    SelectorEntry::new("_mint(address,uint256)", [0x9c, 0x0f, 0x92, 0x9c], 60),
    SelectorEntry::new("removeLiquidity", [0x78, 0x26, 0x55, 0x06], 90),
    SelectorEntry::new("removeLiquidityETH", [0xaf, 0x29, 0x79, 0xeb], 90),
    SelectorEntry::new("drain()", [0xd0, 0x40, 0x22, 0x0a], 100),
    SelectorEntry::new("withdrawETH()", [0x47, 0x4c, 0xf5, 0x3d], 50),
    SelectorEntry::new("_transfer", [0x30, 0xe0, 0x78, 0x9e], 40),
    SelectorEntry::new("_beforeTokenTransfer", [0x38, 0xd5, 0x2e, 0x0f], 30),
    SelectorEntry::new("setMaxTxAmount", [0x83, 0x15, 0x18, 0x77], 20),
];

/// Scans raw deployed code for catalogue selectors, one hit per entry.
pub fn scan(code: &[u8]) -> Vec<&'static SelectorEntry> {
    if code.len() < 4 {
        return Vec::new();
    }
    SELECTOR_TABLE
        .iter()
        .filter(|entry| code.windows(4).any(|window| window == entry.selector))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_embedded_selector() {
        // drain() selector surrounded by dispatcher noise.
        let code = [0x60, 0x00, 0xd0, 0x40, 0x22, 0x0a, 0x14, 0x57];
        let hits = scan(&code);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "drain()");
        assert_eq!(hits[0].weight, 100);
    }

    #[test]
    fn clean_code_has_no_hits() {
        assert!(scan(&[0x60, 0x00, 0x54, 0x00]).is_empty());
        assert!(scan(&[]).is_empty());
    }

    #[test]
    fn each_entry_hit_once_even_when_repeated() {
        let mut code = Vec::new();
        code.extend_from_slice(&[0x40, 0xc1, 0x0f, 0x19]);
        code.extend_from_slice(&[0x40, 0xc1, 0x0f, 0x19]);
        let hits = scan(&code);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "mint(address,uint256)");
    }

    #[test]
    fn table_is_complete_and_distinct() {
        assert_eq!(SELECTOR_TABLE.len(), 18);
        for (i, a) in SELECTOR_TABLE.iter().enumerate() {
            for b in &SELECTOR_TABLE[i + 1..] {
                assert_ne!(a.selector, b.selector, "{} vs {}", a.label, b.label);
            }
        }
    }
}
