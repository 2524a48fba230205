//! Immutable segment files.
//!
//! Layout of `seg_NNNNNN.seg` (all integers little-endian):
//!
//! ```text
//! header    magic "FSEG" | version u32 | doc_count u32 | term_count u32
//!           | docs_offset u64 | dict_offset u64 | postings_offset u64
//! docs      doc_count x (len u32, JSON document)
//! dict      term_count x (field u16, term_len u16, term, positions u8,
//!           doc_freq u32, max_tf u32, offset u64, length u32)
//! postings  per term: doc_freq x (delta doc varint, tf varint,
//!           [tf x delta position varint])
//! ```
//!
//! Dictionary entries are written in (field, term) order. Deletions live
//! beside the segment in a roaring bitmap file named by generation.

use memmap2::Mmap;
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::content::{FieldKind, IndexedDocument, Schema};
use crate::error::{Result, SearchError};
use crate::index::types::*;
use crate::utils::{
    Analyzer, ByteCursor, delta_encode, encode_varint, split_keywords, word_ngrams, write_u16_le,
    write_u32_le, write_u64_le,
};

const SEGMENT_MAGIC: &[u8; 4] = b"FSEG";
const HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8 + 8 + 8;

type TermKey = (u16, String);

#[derive(Default)]
struct TermPostings {
    positional: bool,
    postings: Vec<Posting>,
}

/// Accumulates analyzed documents in memory and writes one segment file
pub struct SegmentBuilder<'a> {
    schema: &'a Schema,
    analyzer: Analyzer,
    docs: Vec<Vec<u8>>,
    terms: BTreeMap<TermKey, TermPostings>,
}

impl<'a> SegmentBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            analyzer: Analyzer::new(&schema.stop_words),
            docs: Vec::new(),
            terms: BTreeMap::new(),
        }
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Analyze and add a document, returning its segment-local number
    pub fn add(&mut self, doc: &IndexedDocument) -> Result<DocNum> {
        let docnum = self.docs.len() as DocNum;
        self.docs.push(serde_json::to_vec(doc)?);

        for (field_id, field) in self.schema.fields.iter().enumerate() {
            if !field.kind.is_indexed() {
                continue;
            }
            let values = doc.field_values(&field.name);
            if values.is_empty() {
                continue;
            }

            // term -> positions (positions left empty for non-text kinds)
            let mut occurrences: BTreeMap<String, (u32, Vec<u32>)> = BTreeMap::new();
            let mut bump = |term: String, position: Option<u32>| {
                let entry = occurrences.entry(term).or_default();
                entry.0 += 1;
                if let Some(p) = position {
                    entry.1.push(p);
                }
            };

            match field.kind {
                FieldKind::Id => {
                    for value in &values {
                        bump(value.to_string(), None);
                    }
                }
                FieldKind::Text => {
                    let mut base = 0u32;
                    for value in &values {
                        let tokens = self.analyzer.tokens(value);
                        let next_base = base + tokens.len() as u32 + 1;
                        for token in tokens {
                            bump(token.text, Some(base + token.position));
                        }
                        base = next_base;
                    }
                }
                FieldKind::NGram => {
                    for value in &values {
                        for gram in word_ngrams(value, self.schema.ngram_min, self.schema.ngram_max) {
                            bump(gram, None);
                        }
                    }
                }
                FieldKind::Keyword => {
                    for keyword in split_keywords(&values) {
                        bump(keyword, None);
                    }
                }
                FieldKind::Timestamp => {}
            }

            let positional = field.kind == FieldKind::Text;
            for (term, (tf, positions)) in occurrences {
                let entry = self.terms.entry((field_id as u16, term)).or_default();
                entry.positional = positional;
                entry.postings.push(Posting {
                    doc: docnum,
                    tf,
                    positions,
                });
            }
        }

        Ok(docnum)
    }

    /// Write the segment file, returning the number of documents written
    pub fn write(self, path: &Path) -> Result<u32> {
        let mut docs_section = Vec::new();
        for doc in &self.docs {
            write_u32_le(&mut docs_section, doc.len() as u32)?;
            docs_section.extend_from_slice(doc);
        }

        let mut dict_section = Vec::new();
        let mut postings_section = Vec::new();
        for ((field_id, term), entry) in &self.terms {
            let offset = postings_section.len() as u64;
            let mut prev_doc = 0u32;
            let mut max_tf = 0u32;

            for posting in &entry.postings {
                encode_varint(posting.doc - prev_doc, &mut postings_section);
                encode_varint(posting.tf, &mut postings_section);
                if entry.positional {
                    delta_encode(&posting.positions, &mut postings_section);
                }
                prev_doc = posting.doc;
                max_tf = max_tf.max(posting.tf);
            }

            let term_bytes = term.as_bytes();
            write_u16_le(&mut dict_section, *field_id)?;
            write_u16_le(&mut dict_section, term_bytes.len() as u16)?;
            dict_section.extend_from_slice(term_bytes);
            dict_section.push(u8::from(entry.positional));
            write_u32_le(&mut dict_section, entry.postings.len() as u32)?;
            write_u32_le(&mut dict_section, max_tf)?;
            write_u64_le(&mut dict_section, offset)?;
            write_u32_le(&mut dict_section, (postings_section.len() as u64 - offset) as u32)?;
        }

        let docs_offset = HEADER_LEN as u64;
        let dict_offset = docs_offset + docs_section.len() as u64;
        let postings_offset = dict_offset + dict_section.len() as u64;

        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(SEGMENT_MAGIC)?;
        write_u32_le(&mut out, INDEX_FORMAT_VERSION)?;
        write_u32_le(&mut out, self.docs.len() as u32)?;
        write_u32_le(&mut out, self.terms.len() as u32)?;
        write_u64_le(&mut out, docs_offset)?;
        write_u64_le(&mut out, dict_offset)?;
        write_u64_le(&mut out, postings_offset)?;
        out.write_all(&docs_section)?;
        out.write_all(&dict_section)?;
        out.write_all(&postings_section)?;
        out.flush()?;
        out.get_ref().sync_all()?;

        Ok(self.docs.len() as u32)
    }
}

#[derive(Debug, Clone, Copy)]
struct StoredEntry {
    entry: DictEntry,
    positional: bool,
}

/// Memory-mapped reader for one segment plus its deletion bitmap
pub struct SegmentReader {
    id: SegmentId,
    path: PathBuf,
    mmap: Mmap,
    doc_spans: Vec<(usize, usize)>,
    dict: BTreeMap<TermKey, StoredEntry>,
    postings_base: usize,
    deleted: RoaringBitmap,
}

impl SegmentReader {
    /// Open the segment described by `meta` inside `index_dir`
    pub fn open(index_dir: &Path, meta: &SegmentMeta) -> Result<Self> {
        let path = index_dir.join(meta.file_name());
        let file = File::open(&path)?;
        // Segment files are never modified after the manifest references them
        let mmap = unsafe { Mmap::map(&file)? };

        let corrupt = |reason: &str| SearchError::corrupt(path.display().to_string(), reason);

        let mut header = ByteCursor::new(&mmap);
        let magic = header.bytes(4).ok_or_else(|| corrupt("truncated header"))?;
        if magic != SEGMENT_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = header.u32().ok_or_else(|| corrupt("truncated header"))?;
        if version != INDEX_FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported version {}", version)));
        }
        let doc_count = header.u32().ok_or_else(|| corrupt("truncated header"))? as usize;
        let term_count = header.u32().ok_or_else(|| corrupt("truncated header"))? as usize;
        let docs_offset = header.u64().ok_or_else(|| corrupt("truncated header"))? as usize;
        let dict_offset = header.u64().ok_or_else(|| corrupt("truncated header"))? as usize;
        let postings_base = header.u64().ok_or_else(|| corrupt("truncated header"))? as usize;

        let mut docs = ByteCursor::at(&mmap, docs_offset);
        let mut doc_spans = Vec::with_capacity(doc_count);
        for _ in 0..doc_count {
            let len = docs.u32().ok_or_else(|| corrupt("truncated documents"))? as usize;
            let start = docs.position();
            docs.bytes(len).ok_or_else(|| corrupt("truncated documents"))?;
            doc_spans.push((start, start + len));
        }

        let mut cursor = ByteCursor::at(&mmap, dict_offset);
        let mut dict = BTreeMap::new();
        for _ in 0..term_count {
            let entry = read_dict_entry(&mut cursor).ok_or_else(|| corrupt("truncated dictionary"))?;
            dict.insert(entry.0, entry.1);
        }

        let deleted = match meta.del_file_name() {
            Some(name) => read_deletions(&index_dir.join(name))?,
            None => RoaringBitmap::new(),
        };

        Ok(Self {
            id: meta.id,
            path,
            mmap,
            doc_spans,
            dict,
            postings_base,
            deleted,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_spans.len() as u32
    }

    pub fn live_count(&self) -> u32 {
        self.doc_count() - self.deleted.len() as u32
    }

    pub fn is_deleted(&self, doc: DocNum) -> bool {
        self.deleted.contains(doc)
    }

    pub fn deletions(&self) -> &RoaringBitmap {
        &self.deleted
    }

    /// Live document numbers
    pub fn live_docs(&self) -> impl Iterator<Item = DocNum> + '_ {
        (0..self.doc_count()).filter(|d| !self.deleted.contains(*d))
    }

    /// Decode a stored document
    pub fn document(&self, doc: DocNum) -> Result<IndexedDocument> {
        let &(start, end) = self
            .doc_spans
            .get(doc as usize)
            .ok_or_else(|| SearchError::corrupt(self.path.display().to_string(), "doc out of range"))?;
        Ok(serde_json::from_slice(&self.mmap[start..end])?)
    }

    pub fn term(&self, field: u16, term: &str) -> Option<DictEntry> {
        self.dict
            .get(&(field, term.to_string()))
            .map(|stored| stored.entry)
    }

    /// Terms of a field starting with `prefix`, in order
    pub fn prefix_terms<'s>(
        &'s self,
        field: u16,
        prefix: &'s str,
    ) -> impl Iterator<Item = (&'s str, DictEntry)> + 's {
        self.dict
            .range((Bound::Included((field, prefix.to_string())), Bound::Unbounded))
            .take_while(move |((f, t), _)| *f == field && t.starts_with(prefix))
            .map(|((_, t), stored)| (t.as_str(), stored.entry))
    }

    /// All terms of a field, in order
    pub fn field_terms(&self, field: u16) -> impl Iterator<Item = (&str, DictEntry)> + '_ {
        self.prefix_terms(field, "")
    }

    pub fn term_count(&self) -> usize {
        self.dict.len()
    }

    /// Decode the postings of a term, including deleted documents
    pub fn postings(&self, field: u16, term: &str) -> Result<Vec<Posting>> {
        let Some(stored) = self.dict.get(&(field, term.to_string())) else {
            return Ok(Vec::new());
        };
        self.decode_postings(stored)
    }

    fn decode_postings(&self, stored: &StoredEntry) -> Result<Vec<Posting>> {
        let corrupt = || SearchError::corrupt(self.path.display().to_string(), "truncated postings");

        let start = self.postings_base + stored.entry.offset as usize;
        let end = start + stored.entry.length as usize;
        let slice = self.mmap.get(start..end).ok_or_else(corrupt)?;
        let mut cursor = ByteCursor::new(slice);

        let mut postings = Vec::with_capacity(stored.entry.doc_freq as usize);
        let mut doc = 0u32;
        for _ in 0..stored.entry.doc_freq {
            doc += cursor.varint().ok_or_else(corrupt)?;
            let tf = cursor.varint().ok_or_else(corrupt)?;
            let mut positions = Vec::new();
            if stored.positional {
                positions.reserve(tf as usize);
                let mut pos = 0u32;
                for _ in 0..tf {
                    pos += cursor.varint().ok_or_else(corrupt)?;
                    positions.push(pos);
                }
            }
            postings.push(Posting { doc, tf, positions });
        }

        Ok(postings)
    }
}

fn read_dict_entry(cursor: &mut ByteCursor<'_>) -> Option<(TermKey, StoredEntry)> {
    let field = cursor.u16()?;
    let term_len = cursor.u16()? as usize;
    let term = String::from_utf8_lossy(cursor.bytes(term_len)?).into_owned();
    let positional = cursor.bytes(1)?[0] != 0;
    let doc_freq = cursor.u32()?;
    let max_tf = cursor.u32()?;
    let offset = cursor.u64()?;
    let length = cursor.u32()?;

    Some((
        (field, term),
        StoredEntry {
            entry: DictEntry {
                doc_freq,
                max_tf,
                offset,
                length,
            },
            positional,
        },
    ))
}

/// Write a deletion bitmap file
pub fn write_deletions(path: &Path, deleted: &RoaringBitmap) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    deleted.serialize_into(&mut out)?;
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(())
}

fn read_deletions(path: &Path) -> Result<RoaringBitmap> {
    let file = File::open(path)?;
    RoaringBitmap::deserialize_from(BufReader::new(file))
        .map_err(|e| SearchError::corrupt(path.display().to_string(), e.to_string()))
}

/// Remove a file that may already be gone
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::schema::note_schema;
    use crate::content::ContentType;
    use tempfile::TempDir;

    fn build(dir: &Path, docs: &[IndexedDocument]) -> SegmentMeta {
        let schema = note_schema();
        let mut builder = SegmentBuilder::new(&schema);
        for doc in docs {
            builder.add(doc).unwrap();
        }
        let meta = SegmentMeta::new(1, docs.len() as u32);
        builder.write(&dir.join(meta.file_name())).unwrap();
        meta
    }

    fn note(oid: &str, text: &str) -> IndexedDocument {
        IndexedDocument::new(oid, ContentType::Note, text).with_creator("alice")
    }

    #[test]
    fn test_write_and_read_postings() {
        let dir = TempDir::new().unwrap();
        let meta = build(
            dir.path(),
            &[note("n1", "fire and ice and fire"), note("n2", "ice cream")],
        );
        let reader = SegmentReader::open(dir.path(), &meta).unwrap();
        let schema = note_schema();
        let content = schema.field_id("content").unwrap();

        assert_eq!(reader.doc_count(), 2);
        let fire = reader.term(content, "fire").unwrap();
        assert_eq!(fire.doc_freq, 1);
        assert_eq!(fire.max_tf, 2);

        let ice = reader.postings(content, "ice").unwrap();
        assert_eq!(ice.len(), 2);
        assert_eq!(ice[0].positions, vec![2]);
        assert_eq!(ice[1].doc, 1);
        assert_eq!(ice[1].positions, vec![0]);
    }

    #[test]
    fn test_ngrams_and_ids_indexed() {
        let dir = TempDir::new().unwrap();
        let meta = build(dir.path(), &[note("n1", "Shield")]);
        let reader = SegmentReader::open(dir.path(), &meta).unwrap();
        let schema = note_schema();

        let quick = schema.field_id("quick").unwrap();
        let grams: Vec<&str> = reader.field_terms(quick).map(|(t, _)| t).collect();
        assert_eq!(grams, vec!["sh", "shi", "shie", "shiel", "shield"]);

        let oid = schema.field_id("oid").unwrap();
        assert!(reader.term(oid, "n1").is_some());
        let creator = schema.field_id("creator").unwrap();
        assert!(reader.term(creator, "alice").is_some());
    }

    #[test]
    fn test_prefix_terms_stay_in_field() {
        let dir = TempDir::new().unwrap();
        let meta = build(dir.path(), &[note("n1", "rain raise rage blue")]);
        let reader = SegmentReader::open(dir.path(), &meta).unwrap();
        let content = note_schema().field_id("content").unwrap();

        let terms: Vec<&str> = reader.prefix_terms(content, "ra").map(|(t, _)| t).collect();
        assert_eq!(terms, vec!["rage", "rain", "raise"]);
    }

    #[test]
    fn test_stored_document_roundtrip() {
        let dir = TempDir::new().unwrap();
        let doc = note("n1", "hello world").with_extra("references", "x");
        let meta = build(dir.path(), &[doc.clone()]);
        let reader = SegmentReader::open(dir.path(), &meta).unwrap();
        assert_eq!(reader.document(0).unwrap(), doc);
        assert!(reader.document(1).is_err());
    }

    #[test]
    fn test_deletions_file() {
        let dir = TempDir::new().unwrap();
        let mut meta = build(dir.path(), &[note("n1", "a b"), note("n2", "c d")]);

        let mut deleted = RoaringBitmap::new();
        deleted.insert(0);
        meta.del_gen = 1;
        meta.deleted = 1;
        write_deletions(&dir.path().join(meta.del_file_name().unwrap()), &deleted).unwrap();

        let reader = SegmentReader::open(dir.path(), &meta).unwrap();
        assert!(reader.is_deleted(0));
        assert_eq!(reader.live_docs().collect::<Vec<_>>(), vec![1]);
        assert_eq!(reader.live_count(), 1);
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let meta = SegmentMeta::new(1, 0);
        fs::write(dir.path().join(meta.file_name()), b"NOPE0000000000000000000000000000000000000").unwrap();
        let err = SegmentReader::open(dir.path(), &meta).err().unwrap();
        assert!(matches!(err, SearchError::Corrupt { .. }));
    }
}
