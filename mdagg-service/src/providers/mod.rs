//! Concrete upstream providers
//!
//! Each provider expresses only its capability contracts; orchestration lives in
//! the aggregator.

pub mod fanart;
pub mod musicbrainz_db;
pub mod theaudiodb;
pub mod wikipedia;

pub use fanart::FanArtTvProvider;
pub use musicbrainz_db::MusicBrainzDbProvider;
pub use theaudiodb::TheAudioDbProvider;
pub use wikipedia::WikipediaProvider;

use crate::models::Image;

/// Keep previously known images over a successful but empty answer
///
/// An empty body is not proof the images were removed; only an authoritative
/// answer (e.g. a 404 for the whole entity) may clear them.
pub(crate) fn keep_previous_if_empty(fetched: Vec<Image>, previous: Option<Vec<Image>>) -> Vec<Image> {
    match previous {
        Some(previous) if fetched.is_empty() && !previous.is_empty() => previous,
        _ => fetched,
    }
}
