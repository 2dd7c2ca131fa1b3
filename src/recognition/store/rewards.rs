//! ポイントで交換できる景品と交換履歴

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{MemoryStore, StoreError, User, UserStatus};

/// 景品
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reward {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub points_cost: i64,
    pub stock: u32,
}

/// 新しい景品（カタログJSONの1要素）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReward {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub points_cost: i64,
    pub stock: u32,
}

/// 配送先
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionContact {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// 交換履歴
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub id: u64,
    pub user_id: u64,
    pub reward_id: u64,
    pub reward_name: String,
    pub points_spent: i64,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MemoryStore {
    /// 景品を追加
    pub fn add_reward(&self, reward: NewReward) -> Result<Reward, StoreError> {
        let name = reward.name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyField("name"));
        }
        if reward.points_cost <= 0 {
            return Err(StoreError::InvalidPointsCost(reward.points_cost));
        }

        let mut inner = self.write();
        inner.next_reward_id += 1;
        let reward = Reward {
            id: inner.next_reward_id,
            name: name.to_string(),
            description: reward.description,
            points_cost: reward.points_cost,
            stock: reward.stock,
        };
        inner.rewards.insert(reward.id, reward.clone());
        Ok(reward)
    }

    /// JSONファイル（景品の配列）から景品を追加する
    pub fn load_rewards(&self, path: &Path) -> Result<usize, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Catalog(format!("{}: {}", path.display(), e)))?;
        let rewards: Vec<NewReward> = serde_json::from_str(&content)
            .map_err(|e| StoreError::Catalog(format!("{}: {}", path.display(), e)))?;

        let count = rewards.len();
        for reward in rewards {
            self.add_reward(reward)?;
        }
        tracing::info!("景品を読み込みました: {} 件", count);
        Ok(count)
    }

    /// 在庫のある景品（ID順）
    pub fn available_rewards(&self) -> Vec<Reward> {
        self.read()
            .rewards
            .values()
            .filter(|r| r.stock > 0)
            .cloned()
            .collect()
    }

    /// 景品を交換する
    ///
    /// 在庫とポイントを確認し、ポイント減算・在庫減算・履歴追加をまとめて行う。
    pub fn redeem_reward(
        &self,
        user_id: u64,
        reward_id: u64,
        contact: RedemptionContact,
    ) -> Result<(User, Redemption), StoreError> {
        let mut inner = self.write();
        let inner = &mut *inner;

        let reward = inner
            .rewards
            .get_mut(&reward_id)
            .ok_or(StoreError::RewardNotFound(reward_id))?;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;

        if user.status == UserStatus::Banned {
            return Err(StoreError::UserBanned(user_id));
        }
        if reward.stock == 0 {
            return Err(StoreError::OutOfStock(reward_id));
        }
        if user.points < reward.points_cost {
            return Err(StoreError::InsufficientPoints {
                required: reward.points_cost,
                available: user.points,
            });
        }

        user.points -= reward.points_cost;
        reward.stock -= 1;

        inner.next_redemption_id += 1;
        let redemption = Redemption {
            id: inner.next_redemption_id,
            user_id,
            reward_id,
            reward_name: reward.name.clone(),
            points_spent: reward.points_cost,
            phone_number: contact.phone_number,
            address: contact.address,
            created_at: Utc::now(),
        };
        let user = user.clone();
        inner.redemptions.push(redemption.clone());

        tracing::info!(user_id, reward_id, remaining = user.points, "景品を交換しました");
        Ok((user, redemption))
    }

    /// ユーザーの交換履歴（新しい順）
    pub fn redemptions_for_user(&self, user_id: u64) -> Result<Vec<Redemption>, StoreError> {
        let inner = self.read();
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound(user_id));
        }

        let mut redemptions: Vec<Redemption> = inner
            .redemptions
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        redemptions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(redemptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::store::{NewHistory, QueryType, Role};

    fn tote_bag(stock: u32) -> NewReward {
        NewReward {
            name: "Tote bag".into(),
            description: None,
            points_cost: 3,
            stock,
        }
    }

    fn user_with_points(store: &MemoryStore, name: &str, points: i64) -> User {
        let user = store.register_user(name, Role::User).unwrap();
        let entry = NewHistory {
            query_type: QueryType::Text,
            query_content: "seed".into(),
            result_category: "recyclable".into(),
        };
        store.award_and_record(user.id, points, entry).unwrap().0
    }

    #[test]
    fn test_redeem_spends_points_and_stock() {
        let store = MemoryStore::new();
        let reward = store.add_reward(tote_bag(2)).unwrap();
        let user = user_with_points(&store, "alice", 5);

        let (updated, redemption) = store
            .redeem_reward(user.id, reward.id, RedemptionContact::default())
            .unwrap();

        assert_eq!(updated.points, 2);
        assert_eq!(redemption.points_spent, 3);
        assert_eq!(redemption.reward_name, "Tote bag");
        assert_eq!(store.available_rewards()[0].stock, 1);
        assert_eq!(store.user(user.id).unwrap().points, 2);
    }

    #[test]
    fn test_redeem_rejections_change_nothing() {
        let store = MemoryStore::new();
        let empty = store.add_reward(tote_bag(0)).unwrap();
        let stocked = store.add_reward(tote_bag(1)).unwrap();
        let user = user_with_points(&store, "bob", 2);

        assert_eq!(
            store.redeem_reward(user.id, 99, RedemptionContact::default()),
            Err(StoreError::RewardNotFound(99))
        );
        assert_eq!(
            store.redeem_reward(user.id, empty.id, RedemptionContact::default()),
            Err(StoreError::OutOfStock(empty.id))
        );
        assert_eq!(
            store.redeem_reward(user.id, stocked.id, RedemptionContact::default()),
            Err(StoreError::InsufficientPoints {
                required: 3,
                available: 2
            })
        );

        assert_eq!(store.user(user.id).unwrap().points, 2);
        assert!(store.redemptions_for_user(user.id).unwrap().is_empty());
        assert_eq!(store.available_rewards().len(), 1);
    }

    #[test]
    fn test_banned_user_cannot_redeem() {
        let store = MemoryStore::new();
        let reward = store.add_reward(tote_bag(1)).unwrap();
        let user = user_with_points(&store, "carol", 10);
        store.set_user_status(user.id, UserStatus::Banned).unwrap();

        assert_eq!(
            store.redeem_reward(user.id, reward.id, RedemptionContact::default()),
            Err(StoreError::UserBanned(user.id))
        );
    }

    #[test]
    fn test_redemption_history_is_newest_first() {
        let store = MemoryStore::new();
        let reward = store.add_reward(tote_bag(5)).unwrap();
        let user = user_with_points(&store, "dave", 9);

        let (_, first) = store
            .redeem_reward(user.id, reward.id, RedemptionContact::default())
            .unwrap();
        let contact = RedemptionContact {
            phone_number: Some("000-0000".into()),
            address: Some("1-2-3".into()),
        };
        let (_, second) = store.redeem_reward(user.id, reward.id, contact).unwrap();

        let history = store.redemptions_for_user(user.id).unwrap();
        assert_eq!(history.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);
        assert_eq!(history[0].address.as_deref(), Some("1-2-3"));
        assert_eq!(store.redemptions_for_user(404), Err(StoreError::UserNotFound(404)));
    }

    #[test]
    fn test_load_rewards_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewards.json");
        std::fs::write(
            &path,
            r#"[{"name": "Compost bin", "points_cost": 50, "stock": 3}]"#,
        )
        .unwrap();

        let store = MemoryStore::new();
        assert_eq!(store.load_rewards(&path).unwrap(), 1);
        assert_eq!(store.available_rewards()[0].name, "Compost bin");
        assert_eq!(
            store.add_reward(NewReward {
                name: "Free".into(),
                description: None,
                points_cost: 0,
                stock: 1
            }),
            Err(StoreError::InvalidPointsCost(0))
        );
    }
}
