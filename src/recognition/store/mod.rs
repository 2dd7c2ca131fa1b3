//! ユーザー、認識履歴、ごみ品目カタログ、記事、景品のインメモリストア
//!
//! ポイント加算と履歴追加は1回の書き込みロック内で行い、片方だけ反映されることはない。
//! 景品交換のポイント減算・在庫減算・交換履歴も同様。

mod articles;
mod rewards;

pub use articles::{Article, ArticleUpdate};
pub use rewards::{NewReward, Redemption, RedemptionContact, Reward};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ストアのエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(u64),

    #[error("username already taken: {0}")]
    UsernameTaken(String),

    #[error("username must not be empty")]
    EmptyUsername,

    #[error("history record not found: {0}")]
    HistoryNotFound(u64),

    #[error("user {user_id} may not modify history record {history_id}")]
    Forbidden { user_id: u64, history_id: u64 },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("user {0} is banned")]
    UserBanned(u64),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("article not found: {0}")]
    ArticleNotFound(u64),

    #[error("reward not found: {0}")]
    RewardNotFound(u64),

    #[error("points_cost must be positive: {0}")]
    InvalidPointsCost(i64),

    #[error("reward {0} is out of stock")]
    OutOfStock(u64),

    #[error("not enough points: {required} required, {available} available")]
    InsufficientPoints { required: i64, available: i64 },
}

/// ユーザー種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// アカウント状態
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Banned,
}

/// ユーザー
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub role: Role,
    pub points: i64,
    pub status: UserStatus,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// 認識の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Image,
    Text,
}

/// 履歴・記事の状態（削除は論理削除）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Deleted,
}

/// 認識履歴
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub id: u64,
    pub user_id: u64,
    pub query_type: QueryType,
    /// 画像ならアップロードURL、文字なら検索語
    pub query_content: String,
    pub result_category: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

/// ごみ品目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarbageItem {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// 新しい履歴の内容
#[derive(Debug, Clone)]
pub struct NewHistory {
    pub query_type: QueryType,
    pub query_content: String,
    pub result_category: String,
}

#[derive(Debug, Default)]
struct Inner {
    users: BTreeMap<u64, User>,
    history: Vec<HistoryRecord>,
    catalog: Vec<GarbageItem>,
    articles: Vec<Article>,
    rewards: BTreeMap<u64, Reward>,
    redemptions: Vec<Redemption>,
    next_user_id: u64,
    next_history_id: u64,
    next_article_id: u64,
    article_revision: u64,
    next_reward_id: u64,
    next_redemption_id: u64,
}

/// インメモリストア
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// カタログ付きで作成
    pub fn with_catalog(catalog: Vec<GarbageItem>) -> Self {
        let store = Self::new();
        store.write().catalog = catalog;
        store
    }

    /// JSONファイル（品目の配列）からカタログを読み込む
    pub fn load_catalog(&self, path: &Path) -> Result<usize, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Catalog(format!("{}: {}", path.display(), e)))?;
        let items: Vec<GarbageItem> = serde_json::from_str(&content)
            .map_err(|e| StoreError::Catalog(format!("{}: {}", path.display(), e)))?;

        let count = items.len();
        self.write().catalog = items;
        tracing::info!("品目カタログを読み込みました: {} 件", count);
        Ok(count)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// ユーザー登録（名前は一意）
    pub fn register_user(&self, username: &str, role: Role) -> Result<User, StoreError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(StoreError::EmptyUsername);
        }

        let mut inner = self.write();
        if inner.users.values().any(|u| u.username == username) {
            return Err(StoreError::UsernameTaken(username.to_string()));
        }

        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            username: username.to_string(),
            role,
            points: 0,
            status: UserStatus::Active,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn user(&self, user_id: u64) -> Result<User, StoreError> {
        self.read()
            .users
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::UserNotFound(user_id))
    }

    pub fn users_count(&self) -> usize {
        self.read().users.len()
    }

    /// 全ユーザー（ID順）
    pub fn list_users(&self) -> Vec<User> {
        self.read().users.values().cloned().collect()
    }

    /// 封禁・解除
    pub fn set_user_status(&self, user_id: u64, status: UserStatus) -> Result<User, StoreError> {
        let mut inner = self.write();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.status = status;
        tracing::info!(user_id, ?status, "ユーザー状態を更新しました");
        Ok(user.clone())
    }

    /// ポイントを加算し、履歴を追加する
    pub fn award_and_record(
        &self,
        user_id: u64,
        points: i64,
        entry: NewHistory,
    ) -> Result<(User, HistoryRecord), StoreError> {
        let mut inner = self.write();
        let inner = &mut *inner;

        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.points += points;
        let user = user.clone();

        inner.next_history_id += 1;
        let record = HistoryRecord {
            id: inner.next_history_id,
            user_id,
            query_type: entry.query_type,
            query_content: entry.query_content,
            result_category: entry.result_category,
            status: RecordStatus::Active,
            created_at: Utc::now(),
        };
        inner.history.push(record.clone());

        Ok((user, record))
    }

    /// ユーザーの履歴（新しい順）
    ///
    /// `include_deleted` が false なら論理削除済みを除く。
    pub fn history_for_user(
        &self,
        user_id: u64,
        include_deleted: bool,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let inner = self.read();
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound(user_id));
        }

        let mut records: Vec<HistoryRecord> = inner
            .history
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| include_deleted || r.status == RecordStatus::Active)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    /// 履歴を論理削除（本人のみ）
    pub fn delete_history(&self, history_id: u64, current_user_id: u64) -> Result<(), StoreError> {
        let mut inner = self.write();
        let record = inner
            .history
            .iter_mut()
            .find(|r| r.id == history_id)
            .ok_or(StoreError::HistoryNotFound(history_id))?;

        if record.user_id != current_user_id {
            return Err(StoreError::Forbidden {
                user_id: current_user_id,
                history_id,
            });
        }

        record.status = RecordStatus::Deleted;
        Ok(())
    }

    /// 品目名の部分一致検索（大文字小文字を区別しない）
    pub fn search_items(&self, query: &str, limit: usize) -> Vec<GarbageItem> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        self.read()
            .catalog
            .iter()
            .filter(|item| item.name.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn catalog_len(&self) -> usize {
        self.read().catalog.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<GarbageItem> {
        vec![
            GarbageItem {
                name: "Battery".into(),
                category: "hazardous".into(),
                description: None,
            },
            GarbageItem {
                name: "Cardboard box".into(),
                category: "recyclable".into(),
                description: Some("flattened".into()),
            },
            GarbageItem {
                name: "Pizza box".into(),
                category: "residual".into(),
                description: None,
            },
        ]
    }

    fn text_entry(category: &str) -> NewHistory {
        NewHistory {
            query_type: QueryType::Text,
            query_content: "box".into(),
            result_category: category.into(),
        }
    }

    #[test]
    fn test_register_rejects_duplicates_and_blank_names() {
        let store = MemoryStore::new();
        let alice = store.register_user("alice", Role::User).unwrap();
        assert_eq!(alice.id, 1);
        assert_eq!(alice.points, 0);

        assert_eq!(
            store.register_user(" alice ", Role::User),
            Err(StoreError::UsernameTaken("alice".into()))
        );
        assert_eq!(store.register_user("  ", Role::User), Err(StoreError::EmptyUsername));
        assert_eq!(store.users_count(), 1);
    }

    #[test]
    fn test_set_user_status() {
        let store = MemoryStore::new();
        let user = store.register_user("zed", Role::User).unwrap();
        assert_eq!(user.status, UserStatus::Active);

        let banned = store.set_user_status(user.id, UserStatus::Banned).unwrap();
        assert_eq!(banned.status, UserStatus::Banned);
        assert_eq!(store.user(user.id).unwrap().status, UserStatus::Banned);
        assert_eq!(
            store.set_user_status(77, UserStatus::Active),
            Err(StoreError::UserNotFound(77))
        );
        assert_eq!(store.list_users().len(), 1);
    }

    #[test]
    fn test_award_updates_points_and_history_together() {
        let store = MemoryStore::new();
        let user = store.register_user("bob", Role::User).unwrap();

        let (updated, record) = store.award_and_record(user.id, 3, text_entry("recyclable")).unwrap();
        assert_eq!(updated.points, 3);
        assert_eq!(record.status, RecordStatus::Active);
        assert_eq!(store.user(user.id).unwrap().points, 3);

        assert_eq!(
            store.award_and_record(99, 1, text_entry("x")).unwrap_err(),
            StoreError::UserNotFound(99)
        );
    }

    #[test]
    fn test_history_is_newest_first_and_hides_deleted() {
        let store = MemoryStore::new();
        let user = store.register_user("carol", Role::User).unwrap();
        let (_, first) = store.award_and_record(user.id, 1, text_entry("a")).unwrap();
        let (_, second) = store.award_and_record(user.id, 1, text_entry("b")).unwrap();

        let records = store.history_for_user(user.id, false).unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        store.delete_history(first.id, user.id).unwrap();
        assert_eq!(store.history_for_user(user.id, false).unwrap().len(), 1);

        let all = store.history_for_user(user.id, true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].status, RecordStatus::Deleted);
    }

    #[test]
    fn test_only_owner_may_delete_history() {
        let store = MemoryStore::new();
        let owner = store.register_user("dave", Role::User).unwrap();
        let other = store.register_user("erin", Role::User).unwrap();
        let (_, record) = store.award_and_record(owner.id, 1, text_entry("a")).unwrap();

        assert_eq!(
            store.delete_history(record.id, other.id),
            Err(StoreError::Forbidden {
                user_id: other.id,
                history_id: record.id
            })
        );
        assert_eq!(store.delete_history(42, owner.id), Err(StoreError::HistoryNotFound(42)));
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let store = MemoryStore::with_catalog(catalog());

        let found = store.search_items("BOX", 10);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "Cardboard box");

        assert_eq!(store.search_items("box", 1).len(), 1);
        assert!(store.search_items("glass", 10).is_empty());
        assert!(store.search_items("   ", 10).is_empty());
    }

    #[test]
    fn test_search_matches_name_only() {
        let store = MemoryStore::with_catalog(catalog());

        // 分類名・説明文には一致しない
        assert!(store.search_items("hazardous", 10).is_empty());
        assert!(store.search_items("flattened", 10).is_empty());
        assert_eq!(store.search_items("batt", 10)[0].category, "hazardous");
    }

    #[test]
    fn test_load_catalog_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_string(&catalog()).unwrap()).unwrap();

        let store = MemoryStore::new();
        assert_eq!(store.load_catalog(&path).unwrap(), 3);
        assert_eq!(store.catalog_len(), 3);

        std::fs::write(&path, "[{").unwrap();
        assert!(matches!(store.load_catalog(&path), Err(StoreError::Catalog(_))));
    }
}
