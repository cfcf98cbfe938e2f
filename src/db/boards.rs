//! Weekly board repository over the object store.

use std::sync::Arc;

use super::ObjectStore;
use crate::error::StoreError;
use crate::models::Board;

/// Typed access to weekly boards.
#[derive(Clone)]
pub struct BoardStore {
    objects: Arc<dyn ObjectStore>,
    prefix: String,
}

impl BoardStore {
    /// `prefix` is prepended to every board key (e.g. `leaderboard/`).
    pub fn new(objects: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            objects,
            prefix: prefix.into(),
        }
    }

    fn object_key(&self, year: i32, week: u32) -> String {
        format!("{}{}", self.prefix, Board::key_for(year, week))
    }

    /// Load a week's board together with its version tag.
    pub async fn get_board(&self, year: i32, week: u32) -> Result<Option<Board>, StoreError> {
        let Some(object) = self
            .objects
            .get_with_version(&self.object_key(year, week))
            .await?
        else {
            return Ok(None);
        };

        let mut board: Board = serde_json::from_slice(&object.body)
            .map_err(|e| StoreError::Transport(format!("corrupt board {}-{}: {}", year, week, e)))?;
        board.version = Some(object.version);
        Ok(Some(board))
    }

    /// Write a board if nobody else wrote it since it was read.
    ///
    /// A board with no version must not exist yet. Returns the new version.
    pub async fn put_board(&self, board: &Board) -> Result<String, StoreError> {
        let body =
            serde_json::to_vec(board).map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
        self.objects
            .put_if_version_matches(
                &self.object_key(board.year, board.week),
                body,
                board.version.as_deref(),
            )
            .await
    }
}
