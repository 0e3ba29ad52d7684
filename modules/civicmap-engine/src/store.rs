// Storage seam.
//
// The engine never owns post data. It reads a flat snapshot and hands back writes;
// the storage collaborator decides how those land (Postgres in production,
// MemoryPostStore in tests).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use civicmap_common::{CoordinateUpdate, Post};
use uuid::Uuid;

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Every post the engine may consider, with counts already aggregated.
    async fn snapshot(&self) -> Result<Vec<Post>>;

    /// Upsert `post` (carrying its new coordinate) and apply `reflowed` to its
    /// siblings. All-or-nothing: on error nothing may have been written.
    async fn save_placement(&self, post: &Post, reflowed: &[CoordinateUpdate]) -> Result<()>;

    /// Delete `post_id` and apply `reflowed` to the siblings it leaves behind.
    /// All-or-nothing.
    async fn delete_post(&self, post_id: Uuid, reflowed: &[CoordinateUpdate]) -> Result<()>;
}

#[async_trait]
impl<T: PostStore + ?Sized> PostStore for Arc<T> {
    async fn snapshot(&self) -> Result<Vec<Post>> {
        (**self).snapshot().await
    }

    async fn save_placement(&self, post: &Post, reflowed: &[CoordinateUpdate]) -> Result<()> {
        (**self).save_placement(post, reflowed).await
    }

    async fn delete_post(&self, post_id: Uuid, reflowed: &[CoordinateUpdate]) -> Result<()> {
        (**self).delete_post(post_id, reflowed).await
    }
}
