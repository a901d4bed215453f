//! Identifiers for pages and the tuples stored on them.

use std::fmt;

/// Identifies one page of one table. Used as the buffer pool cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageAddress {
    pub table_id: u32,
    pub page_number: u32,
}

impl PageAddress {
    pub fn new(table_id: u32, page_number: u32) -> Self {
        Self {
            table_id,
            page_number,
        }
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_number)
    }
}

/// The storage location of exactly one tuple: a page and a slot on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordAddress {
    pub page: PageAddress,
    pub slot: usize,
}

impl RecordAddress {
    pub fn new(page: PageAddress, slot: usize) -> Self {
        Self { page, slot }
    }
}

impl fmt::Display for RecordAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page, self.slot)
    }
}
