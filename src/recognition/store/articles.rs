//! ごみ分別の知識記事

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MemoryStore, RecordStatus, StoreError};

/// 知識記事
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub id: u64,
    pub title: String,
    pub content: String,
    pub author_id: u64,
    pub author_username: Option<String>,
    pub status: RecordStatus,
    pub updated_at: DateTime<Utc>,
    /// 作成・更新の通し番号（同時刻の並び順に使う）
    #[serde(skip)]
    revision: u64,
}

/// 記事の部分更新（`None` の項目は変更しない）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

fn non_empty(value: &str, field: &'static str) -> Result<String, StoreError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StoreError::EmptyField(field));
    }
    Ok(value.to_string())
}

impl MemoryStore {
    /// 記事を作成（作成者は管理者）
    pub fn create_article(
        &self,
        author_id: u64,
        title: &str,
        content: &str,
    ) -> Result<Article, StoreError> {
        let title = non_empty(title, "title")?;
        let content = non_empty(content, "content")?;

        let mut inner = self.write();
        let author = inner
            .users
            .get(&author_id)
            .ok_or(StoreError::UserNotFound(author_id))?
            .username
            .clone();

        inner.next_article_id += 1;
        inner.article_revision += 1;
        let article = Article {
            id: inner.next_article_id,
            title,
            content,
            author_id,
            author_username: Some(author),
            status: RecordStatus::Active,
            updated_at: Utc::now(),
            revision: inner.article_revision,
        };
        inner.articles.push(article.clone());
        Ok(article)
    }

    /// 記事を更新（論理削除済みも対象）
    pub fn update_article(&self, article_id: u64, update: ArticleUpdate) -> Result<Article, StoreError> {
        let title = update.title.as_deref().map(|t| non_empty(t, "title")).transpose()?;
        let content = update
            .content
            .as_deref()
            .map(|c| non_empty(c, "content"))
            .transpose()?;

        let mut inner = self.write();
        let inner = &mut *inner;
        let article = inner
            .articles
            .iter_mut()
            .find(|a| a.id == article_id)
            .ok_or(StoreError::ArticleNotFound(article_id))?;

        inner.article_revision += 1;
        article.revision = inner.article_revision;
        if let Some(title) = title {
            article.title = title;
        }
        if let Some(content) = content {
            article.content = content;
        }
        article.updated_at = Utc::now();
        Ok(article.clone())
    }

    /// 記事を論理削除
    pub fn delete_article(&self, article_id: u64) -> Result<(), StoreError> {
        let mut inner = self.write();
        let article = inner
            .articles
            .iter_mut()
            .find(|a| a.id == article_id)
            .ok_or(StoreError::ArticleNotFound(article_id))?;
        article.status = RecordStatus::Deleted;
        Ok(())
    }

    /// 公開中の記事（更新の新しい順）
    pub fn published_articles(&self) -> Vec<Article> {
        let mut articles: Vec<Article> = self
            .read()
            .articles
            .iter()
            .filter(|a| a.status == RecordStatus::Active)
            .cloned()
            .collect();
        articles.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then(b.revision.cmp(&a.revision))
        });
        articles
    }

    /// 公開中の記事1件
    pub fn published_article(&self, article_id: u64) -> Result<Article, StoreError> {
        self.read()
            .articles
            .iter()
            .find(|a| a.id == article_id && a.status == RecordStatus::Active)
            .cloned()
            .ok_or(StoreError::ArticleNotFound(article_id))
    }

    /// タイトルの部分一致検索（公開中のみ）
    pub fn search_articles(&self, title_query: &str) -> Vec<Article> {
        let needle = title_query.trim().to_lowercase();
        self.published_articles()
            .into_iter()
            .filter(|a| a.title.to_lowercase().contains(&needle))
            .collect()
    }
}
