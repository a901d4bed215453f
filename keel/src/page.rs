//! The layout of a heap page on disk.
//!
//! A page is `header_size` bytes of occupancy bitmap (bit `i` set means slot
//! `i` is in use, least significant bit first within each byte), followed by
//! `num_slots` fixed-width tuple slots, followed by zero padding up to the
//! page size. Empty slots are stored as zero bytes.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{DbError, DbResult};
use crate::page_id::{PageAddress, RecordAddress};
use crate::transaction::TransactionId;
use crate::tuple::{Schema, Tuple};

/// Number of tuple slots that fit in a page: every slot costs its tuple bytes
/// plus one header bit.
pub fn num_slots_for(page_size: usize, tuple_size: usize) -> usize {
    if tuple_size == 0 {
        return 0;
    }
    (page_size * 8) / (tuple_size * 8 + 1)
}

/// Bytes of occupancy bitmap needed for `num_slots` slots.
pub fn header_size_for(num_slots: usize) -> usize {
    num_slots.div_ceil(8)
}

/// Bytes of a freshly allocated page: every slot empty.
pub fn empty_page_data(page_size: usize) -> Vec<u8> {
    vec![0; page_size]
}

/// In-memory form of one slotted heap page.
#[derive(Debug, Clone)]
pub struct HeapPage {
    id: PageAddress,
    schema: Arc<Schema>,
    page_size: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtied_by: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Parses a page from its on-disk bytes; the page size is the length of
    /// `data`. Bytes of empty slots are skipped.
    pub fn parse(id: PageAddress, schema: Arc<Schema>, data: &[u8]) -> DbResult<Self> {
        let page_size = data.len();
        let tuple_size = schema.tuple_size();
        let num_slots = num_slots_for(page_size, tuple_size);
        if num_slots == 0 {
            return Err(DbError::malformed(
                id,
                format!("{tuple_size}-byte tuples do not fit in a {page_size}-byte page"),
            ));
        }
        let header_size = header_size_for(num_slots);

        let mut buf = data;
        let header = buf[..header_size].to_vec();
        buf.advance(header_size);

        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if !bit_is_set(&header, slot) {
                buf.advance(tuple_size);
                tuples.push(None);
                continue;
            }
            let mut tuple = Tuple::parse(&schema, &mut buf)
                .ok_or_else(|| DbError::malformed(id, format!("slot {slot} holds an invalid tuple")))?;
            tuple.set_record_address(Some(RecordAddress::new(id, slot)));
            tuples.push(Some(tuple));
        }

        Ok(Self {
            id,
            schema,
            page_size,
            header,
            tuples,
            dirtied_by: None,
            before_image: data.to_vec(),
        })
    }

    /// An empty page of the given size.
    pub fn empty(id: PageAddress, schema: Arc<Schema>, page_size: usize) -> DbResult<Self> {
        Self::parse(id, schema, &empty_page_data(page_size))
    }

    pub fn id(&self) -> PageAddress {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_slots(&self) -> usize {
        self.tuples.len()
    }

    pub fn header_size(&self) -> usize {
        self.header.len()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots() && bit_is_set(&self.header, slot)
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots()).filter(|&i| !self.is_slot_used(i)).count()
    }

    pub fn num_used_slots(&self) -> usize {
        self.num_slots() - self.num_empty_slots()
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.tuples.get(slot)?.as_ref()
    }

    /// Stored tuples in ascending slot order, skipping empty slots.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.tuples.iter().flatten()
    }

    /// Places `tuple` in the lowest free slot and points its record address
    /// at that slot.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> DbResult<()> {
        if !tuple.schema().is_compatible(&self.schema) {
            return Err(DbError::SchemaMismatch(self.id.table_id));
        }
        let slot = (0..self.num_slots())
            .find(|&i| !self.is_slot_used(i))
            .ok_or(DbError::PageFull(self.id))?;

        tuple.set_record_address(Some(RecordAddress::new(self.id, slot)));
        self.set_slot(slot, true);
        self.tuples[slot] = Some(tuple.clone());
        Ok(())
    }

    /// Clears the slot named by the tuple's record address.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> DbResult<()> {
        let rid = tuple.record_address().ok_or(DbError::MissingRecordAddress)?;
        if rid.page != self.id {
            return Err(DbError::TupleNotOnPage(self.id));
        }
        if !self.is_slot_used(rid.slot) {
            return Err(DbError::SlotEmpty {
                page: self.id,
                slot: rid.slot,
            });
        }
        self.set_slot(rid.slot, false);
        self.tuples[rid.slot] = None;
        Ok(())
    }

    /// Canonical on-disk bytes of this page, exactly `page_size` long.
    pub fn page_data(&self) -> Vec<u8> {
        let tuple_size = self.schema.tuple_size();
        let mut buf = BytesMut::with_capacity(self.page_size);
        buf.put_slice(&self.header);
        for tuple in &self.tuples {
            match tuple {
                Some(t) => t.serialize(&mut buf),
                None => buf.put_bytes(0, tuple_size),
            }
        }
        buf.put_bytes(0, self.page_size - buf.len());
        buf.to_vec()
    }

    /// Marks the page dirty on behalf of `tid`, or clean when `None`.
    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }

    /// The transaction that dirtied this page, if it is dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    /// Snapshots the current bytes as the page's before-image.
    pub fn set_before_image(&mut self) {
        self.before_image = self.page_data();
    }

    /// The page as it looked when the before-image was last taken.
    pub fn before_image(&self) -> DbResult<HeapPage> {
        HeapPage::parse(self.id, Arc::clone(&self.schema), &self.before_image)
    }

    fn set_slot(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }
}

impl PartialEq for HeapPage {
    /// Pages are equal when they address the same page and serialize to the
    /// same bytes; dirty state and before-image are not compared.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.page_data() == other.page_data()
    }
}

fn bit_is_set(header: &[u8], slot: usize) -> bool {
    (header[slot / 8] >> (slot % 8)) & 1 == 1
}
