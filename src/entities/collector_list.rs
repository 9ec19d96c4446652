//! The block/item stock catalogue attached to a collector-list node (chunk `0x0301B000`).

/// One `(block_name, collection, author)` stock entry.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollectorStock {
    pub block_name: String,
    pub collection: String,
    pub author: String,
}

/// A `CGameCtnCollectorList` node: the catalogue of blocks/items a challenge draws from.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollectorList {
    pub class_id: u32,
    pub stocks: Vec<CollectorStock>,
}
