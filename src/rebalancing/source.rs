//! Uniform access to the three entry sources of a partition.

use super::context::SupplyPhase;
use crate::cache::{EntryInfo, LocalEntries, OverflowEntries, OverflowEntry};
use bytes::Bytes;
use std::iter::Peekable;
use uuid::Uuid;

/// An entry read from a source, with the class loader it was written with.
#[derive(Debug)]
pub(crate) struct SourcedEntry {
    pub info: EntryInfo,
    pub loader: Option<Uuid>,
}

/// The entry source of the phase being iterated.
///
/// Local and overflow sources remember the key of the last entry they handed
/// out. Both are scanned in key order, so a suspended iteration resumes by
/// skipping every key up to that one, whatever was added or removed behind
/// it in the meantime.
pub(crate) enum EntrySource<'a> {
    Local {
        iter: Peekable<LocalEntries<'a>>,
        last: Option<Bytes>,
    },
    Overflow {
        iter: Peekable<OverflowEntries<'a>>,
        last: Option<Bytes>,
    },
    Captured(Peekable<std::vec::IntoIter<EntryInfo>>),
}

impl<'a> EntrySource<'a> {
    /// Local entries with keys after `after`.
    pub fn local(iter: LocalEntries<'a>, after: Option<Bytes>) -> Self {
        let mut iter = iter.peekable();
        if let Some(after) = &after {
            while iter.next_if(|e| e.key <= *after).is_some() {}
        }
        Self::Local { iter, last: after }
    }

    /// Overflow entries with keys after `after`.
    pub fn overflow(iter: OverflowEntries<'a>, after: Option<Bytes>) -> Self {
        let mut iter = iter.peekable();
        if let Some(after) = &after {
            while iter.next_if(|e| e.key <= *after).is_some() {}
        }
        Self::Overflow { iter, last: after }
    }

    /// Entries captured by a listener.
    pub fn captured(pending: std::vec::IntoIter<EntryInfo>) -> Self {
        Self::Captured(pending.peekable())
    }

    /// Check if another entry is available.
    pub fn has_next(&mut self) -> bool {
        match self {
            Self::Local { iter, .. } => iter.peek().is_some(),
            Self::Overflow { iter, .. } => iter.peek().is_some(),
            Self::Captured(iter) => iter.peek().is_some(),
        }
    }

    /// Take the next entry.
    pub fn next_entry(&mut self) -> Option<SourcedEntry> {
        match self {
            Self::Local { iter, last } => {
                let info = iter.next()?;
                *last = Some(info.key.clone());
                Some(SourcedEntry { info, loader: None })
            }
            Self::Overflow { iter, last } => {
                let entry: OverflowEntry = iter.next()?;
                *last = Some(entry.key.clone());
                let loader = entry.loader();
                Some(SourcedEntry {
                    info: entry.info(),
                    loader,
                })
            }
            Self::Captured(iter) => iter.next().map(|info| SourcedEntry { info, loader: None }),
        }
    }

    /// Phase to store so that iteration resumes where this source stands.
    pub fn into_phase(self) -> SupplyPhase {
        match self {
            Self::Local { last, .. } => SupplyPhase::LocalEntries { after: last },
            Self::Overflow { last, .. } => SupplyPhase::OverflowEntries { after: last },
            Self::Captured(iter) => SupplyPhase::CapturedEntries {
                pending: iter.collect::<Vec<_>>().into_iter(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: u64) -> Vec<EntryInfo> {
        (0..n)
            .map(|i| EntryInfo::new(format!("key-{i:03}"), "v", i))
            .collect()
    }

    #[test]
    fn test_local_source_resumes_after_key() {
        let data = entries(5);
        let mut source = EntrySource::local(Box::new(data.clone().into_iter()), Some(data[1].key.clone()));

        let first = source.next_entry().unwrap();
        assert_eq!(first.info, data[2]);
        assert!(first.loader.is_none());

        match source.into_phase() {
            SupplyPhase::LocalEntries { after } => assert_eq!(after, Some(data[2].key.clone())),
            other => panic!("unexpected phase {other:?}"),
        }
    }

    #[test]
    fn test_resume_ignores_removed_keys() {
        let data = entries(6);
        // key-000 and key-001 were removed after key-002 was handed out.
        let remaining: Vec<EntryInfo> = data[2..].to_vec();
        let mut source = EntrySource::local(Box::new(remaining.into_iter()), Some(data[2].key.clone()));

        assert_eq!(source.next_entry().unwrap().info, data[3]);
    }

    #[test]
    fn test_fresh_source_keeps_no_position() {
        let source = EntrySource::overflow(Box::new(std::iter::empty::<OverflowEntry>()), None);
        match source.into_phase() {
            SupplyPhase::OverflowEntries { after } => assert!(after.is_none()),
            other => panic!("unexpected phase {other:?}"),
        }
    }

    #[test]
    fn test_overflow_source_carries_loader() {
        let loader = Uuid::new_v4();
        let data: Vec<OverflowEntry> = entries(2)
            .into_iter()
            .map(|e| OverflowEntry::from_info(e).with_loaders(None, Some(loader)))
            .collect();
        let mut source = EntrySource::overflow(Box::new(data.into_iter()), None);

        assert_eq!(source.next_entry().unwrap().loader, Some(loader));
        assert!(source.has_next());
        source.next_entry();
        assert!(!source.has_next());
        assert!(source.next_entry().is_none());
    }

    #[test]
    fn test_captured_source_keeps_pending() {
        let mut source = EntrySource::captured(entries(3).into_iter());
        source.next_entry();

        match source.into_phase() {
            SupplyPhase::CapturedEntries { pending } => assert_eq!(pending.len(), 2),
            other => panic!("unexpected phase {other:?}"),
        }
    }
}
