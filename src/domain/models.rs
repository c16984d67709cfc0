// Domain models shared across subsystems; persisted rows live in `entities`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of item kinds known to the server family we sync against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    Audiobook,
    Episode,
    Podcast,
    Series,
    Author,
    Collection,
}

impl ItemKind {
    /// Progress and bookmarks only make sense for things that can play.
    pub fn is_playable(self) -> bool {
        matches!(self, ItemKind::Audiobook | ItemKind::Episode)
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemKind::Audiobook => "audiobook",
            ItemKind::Episode => "episode",
            ItemKind::Podcast => "podcast",
            ItemKind::Series => "series",
            ItemKind::Author => "author",
            ItemKind::Collection => "collection",
        };
        f.write_str(name)
    }
}

/// Fully qualified reference to an item on one connection.
///
/// For episodes the primary id is the episode and the grouping id is the
/// owning podcast; audiobooks have no grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemIdentifier {
    pub connection_id: String,
    pub primary_id: String,
    pub grouping_id: Option<String>,
    pub kind: ItemKind,
}

impl ItemIdentifier {
    pub fn audiobook(connection_id: impl Into<String>, primary_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            primary_id: primary_id.into(),
            grouping_id: None,
            kind: ItemKind::Audiobook,
        }
    }

    pub fn episode(
        connection_id: impl Into<String>,
        episode_id: impl Into<String>,
        podcast_id: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            primary_id: episode_id.into(),
            grouping_id: Some(podcast_id.into()),
            kind: ItemKind::Episode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playable_kinds() {
        assert!(ItemKind::Audiobook.is_playable());
        assert!(ItemKind::Episode.is_playable());
        assert!(!ItemKind::Podcast.is_playable());
        assert!(!ItemKind::Series.is_playable());
    }

    #[test]
    fn episode_identifier_groups_under_podcast() {
        let item = ItemIdentifier::episode("c1", "ep", "pod");
        assert_eq!(item.primary_id, "ep");
        assert_eq!(item.grouping_id.as_deref(), Some("pod"));
        assert_eq!(item.kind, ItemKind::Episode);
    }
}
