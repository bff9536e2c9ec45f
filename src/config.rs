use crate::error::ShardConnError;
use compact_str::CompactString;

/// Upper bound on role names, matching the identifier width of the SQL layer.
pub const MAX_USER_NAME_LEN: usize = 63;

/// Runtime configuration for a [`PlacementConnectionManager`].
///
/// [`PlacementConnectionManager`]: crate::manager::PlacementConnectionManager
#[derive(Debug, Clone)]
pub struct ShardConnConfig {
    /// Role used when an acquisition does not name one explicitly.
    pub session_user: CompactString,
    /// Initial capacity of the placement index.
    pub placement_capacity: usize,
    /// Initial capacity of the co-location index.
    pub colocation_capacity: usize,
    /// Initial capacity of the shard index.
    pub shard_capacity: usize,
}

impl Default for ShardConnConfig {
    fn default() -> Self {
        Self {
            session_user: CompactString::new("postgres"),
            placement_capacity: 64,
            colocation_capacity: 64,
            shard_capacity: 64,
        }
    }
}

impl ShardConnConfig {
    pub fn for_session_user(user: impl AsRef<str>) -> Self {
        Self {
            session_user: CompactString::new(user.as_ref()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ShardConnError> {
        if self.session_user.is_empty() {
            return Err(ShardConnError::InvalidConfig {
                message: "session_user cannot be empty".into(),
            });
        }
        if self.session_user.len() > MAX_USER_NAME_LEN {
            return Err(ShardConnError::InvalidConfig {
                message: format!("session_user exceeds {MAX_USER_NAME_LEN} bytes"),
            });
        }
        Ok(())
    }
}
