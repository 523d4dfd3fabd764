//! In-memory TMSI table

use super::TmsiTable;
use crate::infrastructure::protocols::gsm::Classmark;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct TmsiRecord {
    imsi: String,
    imei: Option<String>,
    classmark: Option<Classmark>,
}

#[derive(Default)]
struct Tables {
    by_tmsi: HashMap<u32, TmsiRecord>,
    by_imsi: HashMap<String, u32>,
    next: u32,
}

/// TMSIs are handed out in increasing order starting at 1
#[derive(Default)]
pub struct InMemoryTmsiTable {
    tables: Mutex<Tables>,
}

impl InMemoryTmsiTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn imei(&self, imsi: &str) -> Option<String> {
        let tables = self.tables.lock().await;
        let tmsi = tables.by_imsi.get(imsi)?;
        tables.by_tmsi.get(tmsi)?.imei.clone()
    }

    pub async fn classmark(&self, imsi: &str) -> Option<Classmark> {
        let tables = self.tables.lock().await;
        let tmsi = tables.by_imsi.get(imsi)?;
        tables.by_tmsi.get(tmsi)?.classmark
    }
}

#[async_trait::async_trait]
impl TmsiTable for InMemoryTmsiTable {
    async fn tmsi_for(&self, imsi: &str) -> Option<u32> {
        self.tables.lock().await.by_imsi.get(imsi).copied()
    }

    async fn imsi_for(&self, tmsi: u32) -> Option<String> {
        self.tables
            .lock()
            .await
            .by_tmsi
            .get(&tmsi)
            .map(|record| record.imsi.clone())
    }

    async fn assign(&self, imsi: &str) -> u32 {
        let mut tables = self.tables.lock().await;
        let previous = tables
            .by_imsi
            .remove(imsi)
            .and_then(|old| tables.by_tmsi.remove(&old));

        tables.next = tables.next.wrapping_add(1).max(1);
        let tmsi = tables.next;
        let mut record = previous.unwrap_or_default();
        record.imsi = imsi.to_string();
        tables.by_tmsi.insert(tmsi, record);
        tables.by_imsi.insert(imsi.to_string(), tmsi);
        tmsi
    }

    async fn set_imei(&self, imsi: &str, imei: &str) -> bool {
        let mut tables = self.tables.lock().await;
        let Some(tmsi) = tables.by_imsi.get(imsi).copied() else {
            return false;
        };
        match tables.by_tmsi.get_mut(&tmsi) {
            Some(record) => {
                record.imei = Some(imei.to_string());
                true
            }
            None => false,
        }
    }

    async fn set_classmark(&self, imsi: &str, classmark: Classmark) -> bool {
        let mut tables = self.tables.lock().await;
        let Some(tmsi) = tables.by_imsi.get(imsi).copied() else {
            return false;
        };
        match tables.by_tmsi.get_mut(&tmsi) {
            Some(record) => {
                record.classmark = Some(classmark);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMSI: &str = "001010000000001";

    #[tokio::test]
    async fn test_assign_is_monotonic() {
        let table = InMemoryTmsiTable::new();
        let first = table.assign(IMSI).await;
        let second = table.assign("001010000000002").await;
        assert!(second > first);
        assert_eq!(table.tmsi_for(IMSI).await, Some(first));
        assert_eq!(table.imsi_for(second).await.as_deref(), Some("001010000000002"));
    }

    #[tokio::test]
    async fn test_reassign_replaces_old_tmsi() {
        let table = InMemoryTmsiTable::new();
        let old = table.assign(IMSI).await;
        assert!(table.set_imei(IMSI, "356938035643809").await);

        let new = table.assign(IMSI).await;
        assert_ne!(old, new);
        assert_eq!(table.imsi_for(old).await, None);
        assert_eq!(table.tmsi_for(IMSI).await, Some(new));
        assert_eq!(table.imei(IMSI).await.as_deref(), Some("356938035643809"));
    }

    #[tokio::test]
    async fn test_updates_need_an_entry() {
        let table = InMemoryTmsiTable::new();
        assert!(!table.set_imei(IMSI, "1").await);
        assert!(!table.set_classmark(IMSI, Classmark::default()).await);

        table.assign(IMSI).await;
        let classmark = Classmark::new([0x33, 0x19, 0xa2]);
        assert!(table.set_classmark(IMSI, classmark).await);
        assert_eq!(table.classmark(IMSI).await, Some(classmark));
    }
}
