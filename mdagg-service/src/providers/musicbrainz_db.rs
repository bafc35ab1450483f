//! MusicBrainz database provider
//!
//! Reads a MusicBrainz Postgres replica directly. The pool is created on first
//! use, so a provider can be registered before the database is reachable.
//! Every round trip is bounded by the query timeout and reported as
//! [`ProviderError::Timeout`] when it overruns.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::capabilities::{
    AlbumNameSearch, ArtistById, ArtistIdList, ArtistNameSearch, ArtistReleaseGroups,
    DataVintage, InvalidateCache, MediaByRelease, ReleaseGroupArtists, ReleaseGroupById,
    ReleaseGroupIdList, ReleasesByReleaseGroup, TrackSearch, TracksByReleaseGroup,
};
use crate::error::ProviderError;
use crate::models::{
    ArtistRecord, InvalidationResult, Link, Medium, Rating, Release, ReleaseGroupRecord,
    ReleaseGroupSummary, SearchHit, Track, TrackHit,
};
use crate::registry::{CapabilitySet, Provider};

/// Characters MusicBrainz stores in typographic form, with their plain equivalents
const TRANSLATION_TABLE: &[(&str, &str)] = &[
    ("\u{2026}", "..."),
    ("\u{2010}", "-"),
    ("\u{2019}", "'"),
];

const ARTIST_COLUMNS: &str = r#"
    artist.gid::text AS gid,
    artist.name,
    artist.sort_name,
    artist.comment,
    artist.ended,
    artist_type.name AS type,
    artist_meta.rating,
    artist_meta.rating_count
"#;

const ARTIST_JOINS: &str = r#"
    LEFT JOIN artist_type ON artist.type = artist_type.id
    LEFT JOIN artist_meta ON artist.id = artist_meta.id
"#;

const RELEASE_GROUP_COLUMNS: &str = r#"
    release_group.gid::text AS gid,
    release_group.name,
    release_group.comment,
    release_group_primary_type.name AS primary_type,
    ARRAY(
        SELECT release_group_secondary_type.name::text
        FROM release_group_secondary_type_join
        JOIN release_group_secondary_type
            ON release_group_secondary_type.id = release_group_secondary_type_join.secondary_type
        WHERE release_group_secondary_type_join.release_group = release_group.id
        ORDER BY release_group_secondary_type.name
    ) AS secondary_types,
    release_group_meta.first_release_date_year AS year,
    release_group_meta.first_release_date_month AS month,
    release_group_meta.first_release_date_day AS day,
    release_group_meta.rating,
    release_group_meta.rating_count
"#;

const RELEASE_GROUP_JOINS: &str = r#"
    LEFT JOIN release_group_primary_type ON release_group.type = release_group_primary_type.id
    LEFT JOIN release_group_meta ON release_group.id = release_group_meta.id
"#;

/// Await one database round trip for at most `limit`
pub async fn bounded<T>(
    limit: Duration,
    query: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(limit, query).await {
        Ok(result) => result.map_err(ProviderError::from),
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

pub struct MusicBrainzDbProvider {
    database_url: String,
    max_connections: u32,
    query_timeout: Duration,
    pool: OnceCell<PgPool>,
}

impl MusicBrainzDbProvider {
    pub fn new(database_url: impl Into<String>, max_connections: u32, query_timeout: Duration) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections,
            query_timeout,
            pool: OnceCell::new(),
        }
    }

    /// Shared pool; concurrent first callers wait on a single connect
    async fn pool(&self) -> Result<&PgPool, ProviderError> {
        self.pool
            .get_or_try_init(|| async {
                info!(max_connections = self.max_connections, "Connecting to MusicBrainz database");
                PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(&self.database_url)
                    .await
                    .map_err(ProviderError::from)
            })
            .await
    }

    async fn links(&self, table: &str, entity: &str, ids: &[String]) -> Result<HashMap<String, Vec<Link>>, ProviderError> {
        let sql = format!(
            r#"
            SELECT {entity}.gid::text AS gid, url.url
            FROM {entity}
            JOIN {table} ON {table}.entity0 = {entity}.id
            JOIN url ON url.id = {table}.entity1
            WHERE {entity}.gid = ANY($1::text[]::uuid[])
            ORDER BY url.url
            "#
        );

        let pool = self.pool().await?;
        let rows = bounded(self.query_timeout, sqlx::query(&sql).bind(ids).fetch_all(pool)).await?;

        let mut links: HashMap<String, Vec<Link>> = HashMap::new();
        for row in rows {
            let gid: String = row.try_get("gid")?;
            let target: String = row.try_get("url")?;
            links.entry(gid).or_default().push(Link {
                link_type: parse_url_source(&target),
                target,
            });
        }
        Ok(links)
    }

    async fn changed_ids(&self, table: &str, since: DateTime<Utc>) -> Result<BTreeSet<String>, ProviderError> {
        let sql = format!("SELECT gid::text FROM {table} WHERE last_updated > $1");
        let pool = self.pool().await?;
        let ids: Vec<String> =
            bounded(self.query_timeout, sqlx::query_scalar(&sql).bind(since).fetch_all(pool)).await?;

        Ok(ids.into_iter().collect())
    }
}

fn rating(row: &PgRow) -> Result<Rating, sqlx::Error> {
    let value: Option<i16> = row.try_get("rating")?;
    let count: Option<i32> = row.try_get("rating_count")?;
    Ok(Rating {
        count: count.unwrap_or(0).max(0) as u32,
        value: value.map(|v| f64::from(v) / 10.0),
    })
}

fn release_date(row: &PgRow) -> Result<Option<NaiveDate>, sqlx::Error> {
    let year: Option<i16> = row.try_get("year")?;
    let month: Option<i16> = row.try_get("month")?;
    let day: Option<i16> = row.try_get("day")?;

    Ok(year.and_then(|year| {
        NaiveDate::from_ymd_opt(
            i32::from(year),
            month.unwrap_or(1).max(1) as u32,
            day.unwrap_or(1).max(1) as u32,
        )
    }))
}

/// `year-month-day` with zero for an unknown part, as the release query emits it
fn parse_partial_date(raw: &str) -> (i32, u32, u32) {
    let mut parts = raw.split('-').map(|part| part.parse::<i64>().unwrap_or(0).max(0));
    let mut next = || parts.next().unwrap_or(0);
    (next() as i32, next() as u32, next() as u32)
}

/// Earliest fully known date; failing that, the earliest date with a known year
pub fn earliest_good_date(dates: &[String]) -> Option<NaiveDate> {
    let parsed: Vec<(i32, u32, u32)> = dates.iter().map(|raw| parse_partial_date(raw)).collect();

    let complete = parsed
        .iter()
        .filter(|(_, month, day)| *month > 0 && *day > 0)
        .filter_map(|&(year, month, day)| NaiveDate::from_ymd_opt(year, month, day))
        .min();

    complete.or_else(|| {
        parsed
            .iter()
            .filter(|(year, _, _)| *year > 0)
            .filter_map(|&(year, month, day)| NaiveDate::from_ymd_opt(year, month.max(1), day.max(1)))
            .min()
    })
}

fn release(row: &PgRow) -> Result<Release, sqlx::Error> {
    let dates: Vec<String> = row.try_get("release_dates")?;
    let track_count: i64 = row.try_get("track_count")?;

    Ok(Release {
        id: row.try_get("gid")?,
        title: mb_decode(&row.try_get::<String, _>("name")?),
        disambiguation: mb_decode(&row.try_get::<String, _>("comment")?),
        status: row.try_get("status")?,
        label: row.try_get("label")?,
        country: row.try_get("country")?,
        release_date: earliest_good_date(&dates),
        media: Vec::new(),
        track_count: track_count.max(0) as u32,
        tracks: Vec::new(),
    })
}

fn track(row: &PgRow) -> Result<Track, sqlx::Error> {
    let length: Option<i32> = row.try_get("length")?;
    let medium_position: i32 = row.try_get("medium_position")?;
    let position: i32 = row.try_get("position")?;

    Ok(Track {
        id: row.try_get("gid")?,
        recording_id: row.try_get("recording_id")?,
        release_id: row.try_get("release_id")?,
        artist_id: row.try_get("artist_id")?,
        track_name: mb_decode(&row.try_get::<String, _>("name")?),
        duration_ms: length.map(|ms| ms.max(0) as u32),
        medium_number: medium_position.max(0) as u32,
        track_number: row.try_get("number")?,
        track_position: position.max(0) as u32,
    })
}

fn artist_record(row: &PgRow) -> Result<ArtistRecord, sqlx::Error> {
    let ended: bool = row.try_get("ended")?;
    let artist_type: Option<String> = row.try_get("type")?;

    Ok(ArtistRecord {
        id: row.try_get("gid")?,
        artist_name: mb_decode(&row.try_get::<String, _>("name")?),
        sort_name: mb_decode(&row.try_get::<String, _>("sort_name")?),
        disambiguation: mb_decode(&row.try_get::<String, _>("comment")?),
        artist_type: artist_type.unwrap_or_else(|| "Artist".to_string()),
        status: if ended { "ended" } else { "active" }.to_string(),
        links: Vec::new(),
        rating: rating(row)?,
    })
}

fn release_group_record(row: &PgRow) -> Result<ReleaseGroupRecord, sqlx::Error> {
    Ok(ReleaseGroupRecord {
        id: row.try_get("gid")?,
        title: mb_decode(&row.try_get::<String, _>("name")?),
        disambiguation: mb_decode(&row.try_get::<String, _>("comment")?),
        primary_type: row.try_get("primary_type")?,
        secondary_types: row.try_get("secondary_types")?,
        release_date: release_date(row)?,
        artist_id: row.try_get("artist_id")?,
        links: Vec::new(),
        rating: rating(row)?,
    })
}

/// Plain text to the typographic form MusicBrainz stores
pub fn mb_encode(s: &str) -> String {
    let collapsed = s.split(' ').filter(|part| !part.is_empty()).collect::<Vec<_>>().join(" ");
    TRANSLATION_TABLE
        .iter()
        .fold(collapsed, |acc, (stored, plain)| acc.replace(plain, stored))
}

/// Typographic characters from MusicBrainz to plain text
pub fn mb_decode(s: &str) -> String {
    TRANSLATION_TABLE
        .iter()
        .fold(s.to_string(), |acc, (stored, plain)| acc.replace(stored, plain))
}

/// Site name of a link, e.g. `wikipedia` for `https://en.wikipedia.org/...`
pub fn parse_url_source(url: &str) -> String {
    let Some(domain) = url.split('/').nth(2) else {
        return url.to_string();
    };

    let labels: Vec<&str> = domain.split('.').collect();
    match labels.len() {
        0 | 1 => domain.to_string(),
        n if labels[n - 2] == "co" && n >= 3 => labels[n - 3].to_string(),
        n => labels[n - 2].to_string(),
    }
}

/// 0-100 score from how much of `name` the query covers
pub fn match_score(query: &str, name: &str) -> u32 {
    let query = query.trim().to_lowercase();
    let name = name.trim().to_lowercase();

    if query.is_empty() || name.is_empty() {
        return 0;
    }
    if query == name {
        return 100;
    }

    let query_len = query.chars().count() as f64;
    let name_len = name.chars().count() as f64;
    let base = if name.contains(&query) { 90.0 } else { 70.0 };
    (base * query_len.min(name_len) / query_len.max(name_len)).round() as u32
}

#[async_trait]
impl Provider for MusicBrainzDbProvider {
    fn name(&self) -> &str {
        "musicbrainz"
    }

    fn register_capabilities(self: Arc<Self>, capabilities: &mut CapabilitySet) {
        capabilities.add::<dyn ArtistById>(self.clone());
        capabilities.add::<dyn ArtistIdList>(self.clone());
        capabilities.add::<dyn ArtistNameSearch>(self.clone());
        capabilities.add::<dyn ArtistReleaseGroups>(self.clone());
        capabilities.add::<dyn ReleaseGroupById>(self.clone());
        capabilities.add::<dyn ReleaseGroupIdList>(self.clone());
        capabilities.add::<dyn ReleaseGroupArtists>(self.clone());
        capabilities.add::<dyn AlbumNameSearch>(self.clone());
        capabilities.add::<dyn ReleasesByReleaseGroup>(self.clone());
        capabilities.add::<dyn MediaByRelease>(self.clone());
        capabilities.add::<dyn TracksByReleaseGroup>(self.clone());
        capabilities.add::<dyn TrackSearch>(self.clone());
        capabilities.add::<dyn DataVintage>(self.clone());
        capabilities.add::<dyn InvalidateCache>(self);
    }

    async fn init(&self) -> Result<(), ProviderError> {
        self.pool().await.map(|_| ())
    }

    async fn shutdown(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl ArtistById for MusicBrainzDbProvider {
    async fn artists_by_id(&self, ids: &[String]) -> Result<Vec<ArtistRecord>, ProviderError> {
        let sql = format!(
            "SELECT {ARTIST_COLUMNS} FROM artist {ARTIST_JOINS} WHERE artist.gid = ANY($1::text[]::uuid[])"
        );
        let pool = self.pool().await?;
        let rows = bounded(self.query_timeout, sqlx::query(&sql).bind(ids).fetch_all(pool)).await?;

        let mut artists = rows
            .iter()
            .map(artist_record)
            .collect::<Result<Vec<_>, _>>()?;

        let mut links = self.links("l_artist_url", "artist", ids).await?;
        for artist in &mut artists {
            artist.links = links.remove(&artist.id).unwrap_or_default();
        }

        Ok(artists)
    }
}

#[async_trait]
impl ArtistIdList for MusicBrainzDbProvider {
    async fn all_artist_ids(&self) -> Result<Vec<String>, ProviderError> {
        let pool = self.pool().await?;
        bounded(
            self.query_timeout,
            sqlx::query_scalar("SELECT gid::text FROM artist").fetch_all(pool),
        )
        .await
    }
}

#[async_trait]
impl ArtistNameSearch for MusicBrainzDbProvider {
    async fn search_artist_name(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let encoded = mb_encode(query);
        let pool = self.pool().await?;
        let search = sqlx::query(
            r#"
            SELECT artist.gid::text AS gid, artist.name
            FROM artist
            LEFT JOIN artist_meta ON artist.id = artist_meta.id
            WHERE to_tsvector('simple', artist.name) @@ plainto_tsquery('simple', $1)
               OR lower(artist.name) = lower($1)
            ORDER BY lower(artist.name) = lower($1) DESC, artist_meta.rating_count DESC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(&encoded)
        .bind(limit as i64)
        .fetch_all(pool);
        let rows = bounded(self.query_timeout, search).await?;

        let mut hits = rows
            .iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                Ok(SearchHit {
                    id: row.try_get("gid")?,
                    score: match_score(query, &mb_decode(&name)),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        hits.sort_by(|a, b| b.score.cmp(&a.score));
        debug!(query, count = hits.len(), "Artist search");
        Ok(hits)
    }
}

#[async_trait]
impl AlbumNameSearch for MusicBrainzDbProvider {
    async fn search_album_name(
        &self,
        query: &str,
        artist_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let encoded = mb_encode(query);
        let pool = self.pool().await?;
        let search = sqlx::query(
            r#"
            SELECT release_group.gid::text AS gid, release_group.name
            FROM release_group
            JOIN artist_credit ON artist_credit.id = release_group.artist_credit
            WHERE (to_tsvector('simple', release_group.name) @@ plainto_tsquery('simple', $1)
                   OR lower(release_group.name) = lower($1))
              AND ($2::text IS NULL
                   OR to_tsvector('simple', artist_credit.name) @@ plainto_tsquery('simple', $2))
            ORDER BY lower(release_group.name) = lower($1) DESC
            LIMIT $3
            "#,
        )
        .bind(&encoded)
        .bind(artist_name.map(mb_encode))
        .bind(limit as i64)
        .fetch_all(pool);
        let rows = bounded(self.query_timeout, search).await?;

        let mut hits = rows
            .iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                Ok(SearchHit {
                    id: row.try_get("gid")?,
                    score: match_score(query, &mb_decode(&name)),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        hits.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(hits)
    }
}

#[async_trait]
impl ReleaseGroupById for MusicBrainzDbProvider {
    async fn release_groups_by_id(&self, ids: &[String]) -> Result<Vec<ReleaseGroupRecord>, ProviderError> {
        let sql = format!(
            r#"
            SELECT {RELEASE_GROUP_COLUMNS}, credited.gid::text AS artist_id
            FROM release_group
            {RELEASE_GROUP_JOINS}
            JOIN artist_credit_name ON artist_credit_name.artist_credit = release_group.artist_credit
                AND artist_credit_name.position = 0
            JOIN artist credited ON credited.id = artist_credit_name.artist
            WHERE release_group.gid = ANY($1::text[]::uuid[])
            "#
        );
        let pool = self.pool().await?;
        let rows = bounded(self.query_timeout, sqlx::query(&sql).bind(ids).fetch_all(pool)).await?;

        let mut release_groups = rows
            .iter()
            .map(release_group_record)
            .collect::<Result<Vec<_>, _>>()?;

        let mut links = self.links("l_release_group_url", "release_group", ids).await?;
        for release_group in &mut release_groups {
            release_group.links = links.remove(&release_group.id).unwrap_or_default();
        }

        Ok(release_groups)
    }
}

#[async_trait]
impl ReleaseGroupIdList for MusicBrainzDbProvider {
    async fn all_release_group_ids(&self) -> Result<Vec<String>, ProviderError> {
        let pool = self.pool().await?;
        bounded(
            self.query_timeout,
            sqlx::query_scalar("SELECT gid::text FROM release_group").fetch_all(pool),
        )
        .await
    }
}

#[async_trait]
impl ReleaseGroupArtists for MusicBrainzDbProvider {
    async fn release_group_artist_ids(&self, id: &str) -> Result<Vec<String>, ProviderError> {
        let pool = self.pool().await?;
        let credits = sqlx::query_scalar(
            r#"
            SELECT artist.gid::text
            FROM release_group
            JOIN artist_credit_name ON artist_credit_name.artist_credit = release_group.artist_credit
            JOIN artist ON artist.id = artist_credit_name.artist
            WHERE release_group.gid = $1::uuid
            ORDER BY artist_credit_name.position
            "#,
        )
        .bind(id)
        .fetch_all(pool);
        let ids: Vec<String> = bounded(self.query_timeout, credits).await?;

        let mut seen = std::collections::HashSet::new();
        Ok(ids.into_iter().filter(|id| seen.insert(id.clone())).collect())
    }
}

#[async_trait]
impl ArtistReleaseGroups for MusicBrainzDbProvider {
    async fn release_groups_by_artist(&self, artist_id: &str) -> Result<Vec<ReleaseGroupSummary>, ProviderError> {
        let sql = format!(
            r#"
            SELECT {RELEASE_GROUP_COLUMNS},
                ARRAY(
                    SELECT DISTINCT release_status.name::text
                    FROM release
                    JOIN release_status ON release_status.id = release.status
                    WHERE release.release_group = release_group.id
                ) AS release_statuses
            FROM release_group
            {RELEASE_GROUP_JOINS}
            WHERE release_group.artist_credit IN (
                SELECT artist_credit_name.artist_credit
                FROM artist_credit_name
                JOIN artist ON artist.id = artist_credit_name.artist
                WHERE artist.gid = $1::uuid
            )
            ORDER BY year NULLS LAST, month NULLS LAST, day NULLS LAST, release_group.name
            "#
        );
        let pool = self.pool().await?;
        let rows = bounded(self.query_timeout, sqlx::query(&sql).bind(artist_id).fetch_all(pool)).await?;

        Ok(rows
            .iter()
            .map(|row| {
                Ok(ReleaseGroupSummary {
                    id: row.try_get("gid")?,
                    title: mb_decode(&row.try_get::<String, _>("name")?),
                    disambiguation: mb_decode(&row.try_get::<String, _>("comment")?),
                    primary_type: row.try_get("primary_type")?,
                    secondary_types: row.try_get("secondary_types")?,
                    release_statuses: row.try_get("release_statuses")?,
                    release_date: release_date(row)?,
                    rating: rating(row)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }
}

#[async_trait]
impl ReleasesByReleaseGroup for MusicBrainzDbProvider {
    async fn releases_by_release_group(&self, id: &str) -> Result<Vec<Release>, ProviderError> {
        let pool = self.pool().await?;
        let query = sqlx::query(
            r#"
            SELECT
                release.gid::text AS gid,
                release.name,
                release.comment,
                release_status.name AS status,
                ARRAY(
                    SELECT DISTINCT label.name::text
                    FROM release_label
                    JOIN label ON label.id = release_label.label
                    WHERE release_label.release = release.id
                ) AS label,
                ARRAY(
                    SELECT DISTINCT area.name::text
                    FROM release_country
                    JOIN area ON area.id = release_country.country
                    WHERE release_country.release = release.id
                ) AS country,
                ARRAY(
                    SELECT concat_ws('-', COALESCE(dates.date_year, 0), COALESCE(dates.date_month, 0), COALESCE(dates.date_day, 0))
                    FROM (
                        SELECT date_year, date_month, date_day
                        FROM release_country WHERE release_country.release = release.id
                        UNION ALL
                        SELECT date_year, date_month, date_day
                        FROM release_unknown_country WHERE release_unknown_country.release = release.id
                    ) dates
                ) AS release_dates,
                (SELECT COALESCE(SUM(medium.track_count), 0) FROM medium WHERE medium.release = release.id)::bigint
                    AS track_count
            FROM release
            JOIN release_group ON release_group.id = release.release_group
            LEFT JOIN release_status ON release_status.id = release.status
            WHERE release_group.gid = $1::uuid
            ORDER BY release.id
            "#,
        )
        .bind(id)
        .fetch_all(pool);
        let rows = bounded(self.query_timeout, query).await?;

        Ok(rows.iter().map(release).collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl MediaByRelease for MusicBrainzDbProvider {
    async fn release_media(
        &self,
        release_ids: &[String],
    ) -> Result<HashMap<String, Vec<Medium>>, ProviderError> {
        let pool = self.pool().await?;
        let query = sqlx::query(
            r#"
            SELECT
                release.gid::text AS release_id,
                medium_format.name AS format,
                medium.name,
                medium.position
            FROM medium
            JOIN release ON release.id = medium.release
            LEFT JOIN medium_format ON medium_format.id = medium.format
            WHERE release.gid = ANY($1::text[]::uuid[])
            ORDER BY release.gid, medium.position
            "#,
        )
        .bind(release_ids)
        .fetch_all(pool);
        let rows = bounded(self.query_timeout, query).await?;

        let mut media: HashMap<String, Vec<Medium>> = HashMap::new();
        for row in rows {
            let release_id: String = row.try_get("release_id")?;
            let format: Option<String> = row.try_get("format")?;
            let position: i32 = row.try_get("position")?;
            media.entry(release_id).or_default().push(Medium {
                format: format.unwrap_or_default(),
                name: row.try_get("name")?,
                position: position.max(0) as u32,
            });
        }
        Ok(media)
    }
}

#[async_trait]
impl TracksByReleaseGroup for MusicBrainzDbProvider {
    async fn release_group_tracks(&self, id: &str) -> Result<Vec<Track>, ProviderError> {
        let pool = self.pool().await?;
        let query = sqlx::query(
            r#"
            SELECT
                track.gid::text AS gid,
                recording.gid::text AS recording_id,
                release.gid::text AS release_id,
                artist.gid::text AS artist_id,
                track.name,
                track.length,
                medium.position AS medium_position,
                track.number,
                track.position
            FROM track
            JOIN medium ON medium.id = track.medium
            JOIN release ON release.id = medium.release
            JOIN release_group ON release_group.id = release.release_group
            JOIN recording ON recording.id = track.recording
            JOIN artist_credit_name ON artist_credit_name.artist_credit = track.artist_credit
                AND artist_credit_name.position = 0
            JOIN artist ON artist.id = artist_credit_name.artist
            WHERE release_group.gid = $1::uuid
            ORDER BY release.id, medium.position, track.position
            "#,
        )
        .bind(id)
        .fetch_all(pool);
        let rows = bounded(self.query_timeout, query).await?;

        Ok(rows.iter().map(track).collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl TrackSearch for MusicBrainzDbProvider {
    async fn search_track(
        &self,
        query: &str,
        artist_name: Option<&str>,
        album_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TrackHit>, ProviderError> {
        let encoded = mb_encode(query);
        let pool = self.pool().await?;
        let search = sqlx::query(
            r#"
            SELECT
                track.name AS track_name,
                track.length,
                artist.name AS artist_name,
                artist.gid::text AS artist_id,
                release_group.name AS album_title,
                release_group.gid::text AS album_id,
                release_group_meta.rating,
                release_group_meta.rating_count
            FROM track
            JOIN artist_credit_name ON artist_credit_name.artist_credit = track.artist_credit
                AND artist_credit_name.position = 0
            JOIN artist ON artist.id = artist_credit_name.artist
            JOIN medium ON medium.id = track.medium
            JOIN release ON release.id = medium.release
            JOIN release_group ON release_group.id = release.release_group
            LEFT JOIN release_group_meta ON release_group_meta.id = release_group.id
            WHERE (to_tsvector('simple', track.name) @@ plainto_tsquery('simple', $1)
                   OR lower(track.name) = lower($1))
              AND ($2::text IS NULL
                   OR to_tsvector('simple', artist.name) @@ plainto_tsquery('simple', $2))
              AND ($3::text IS NULL
                   OR to_tsvector('simple', release_group.name) @@ plainto_tsquery('simple', $3))
            ORDER BY lower(track.name) = lower($1) DESC, release_group_meta.rating_count DESC NULLS LAST
            LIMIT $4
            "#,
        )
        .bind(&encoded)
        .bind(artist_name.map(mb_encode))
        .bind(album_name.map(mb_encode))
        .bind(limit as i64)
        .fetch_all(pool);
        let rows = bounded(self.query_timeout, search).await?;

        let hits = rows
            .iter()
            .map(|row| {
                let length: Option<i32> = row.try_get("length")?;
                Ok(TrackHit {
                    track_name: mb_decode(&row.try_get::<String, _>("track_name")?),
                    duration_ms: length.map(|ms| ms.max(0) as u32),
                    artist_name: mb_decode(&row.try_get::<String, _>("artist_name")?),
                    artist_id: row.try_get("artist_id")?,
                    album_title: mb_decode(&row.try_get::<String, _>("album_title")?),
                    album_id: row.try_get("album_id")?,
                    rating: rating(row)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        debug!(query, count = hits.len(), "Track search");
        Ok(hits)
    }
}

#[async_trait]
impl DataVintage for MusicBrainzDbProvider {
    async fn data_vintage(&self) -> Result<DateTime<Utc>, ProviderError> {
        let pool = self.pool().await?;
        let vintage: Option<DateTime<Utc>> = bounded(
            self.query_timeout,
            sqlx::query_scalar("SELECT last_replication_date FROM replication_control LIMIT 1")
                .fetch_optional(pool),
        )
        .await?
        .flatten();

        Ok(vintage.unwrap_or_else(mdagg_common::time::epoch))
    }
}

#[async_trait]
impl InvalidateCache for MusicBrainzDbProvider {
    fn watermark_name(&self) -> &str {
        "musicbrainz"
    }

    async fn current_watermark(&self) -> Result<DateTime<Utc>, ProviderError> {
        self.data_vintage().await
    }

    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<InvalidationResult, ProviderError> {
        let artists = self.changed_ids("artist", since).await?;
        let albums = self.changed_ids("release_group", since).await?;

        info!(artists = artists.len(), albums = albums.len(), "MusicBrainz entities changed");
        Ok(InvalidationResult { artists, albums })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mb_decode_replaces_typographic_characters() {
        assert_eq!(mb_decode("And\u{2026} Then"), "And... Then");
        assert_eq!(mb_decode("Jay\u{2010}Z"), "Jay-Z");
    }

    #[test]
    fn test_mb_encode_collapses_spaces_and_inverts_table() {
        assert_eq!(mb_encode("And...   Then"), "And\u{2026} Then");
        assert_eq!(mb_decode(&mb_encode("Guns N' Roses")), "Guns N' Roses");
    }

    #[test]
    fn test_parse_url_source() {
        assert_eq!(parse_url_source("https://en.wikipedia.org/wiki/Foo"), "wikipedia");
        assert_eq!(parse_url_source("https://www.wikidata.org/wiki/Q1"), "wikidata");
        assert_eq!(parse_url_source("http://www.bbc.co.uk/music/artists/x"), "bbc");
        assert_eq!(parse_url_source("https://localhost/x"), "localhost");
        assert_eq!(parse_url_source("not a url"), "not a url");
    }

    #[test]
    fn test_match_score() {
        assert_eq!(match_score("Björk", "björk"), 100);
        assert!(match_score("beatles", "the beatles") > match_score("beat", "the beatles"));
        assert_eq!(match_score("", "x"), 0);
    }

    #[test]
    fn test_earliest_good_date_prefers_complete_dates() {
        let dates = vec!["1995-0-0".to_string(), "1997-3-12".to_string(), "1996-5-0".to_string()];
        assert_eq!(earliest_good_date(&dates), NaiveDate::from_ymd_opt(1997, 3, 12));
    }

    #[test]
    fn test_earliest_good_date_falls_back_to_partial() {
        let dates = vec!["1996-5-0".to_string(), "1995-0-0".to_string(), "0-0-0".to_string()];
        assert_eq!(earliest_good_date(&dates), NaiveDate::from_ymd_opt(1995, 1, 1));

        assert_eq!(earliest_good_date(&["0-0-0".to_string()]), None);
        assert_eq!(earliest_good_date(&[]), None);
    }

    #[tokio::test]
    async fn test_bounded_query_times_out() {
        let limit = Duration::from_millis(20);

        let result = bounded(limit, std::future::pending::<Result<Vec<String>, sqlx::Error>>()).await;

        assert!(matches!(result, Err(ProviderError::Timeout(d)) if d == limit));
        assert!(result.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_bounded_query_maps_database_errors() {
        let result = bounded(Duration::from_secs(1), async {
            Err::<(), _>(sqlx::Error::RowNotFound)
        })
        .await;

        assert!(matches!(result, Err(ProviderError::NotFound)));
    }

    #[tokio::test]
    async fn test_unreachable_database_is_unavailable() {
        let provider =
            MusicBrainzDbProvider::new("postgres://nobody@127.0.0.1:1/none", 1, Duration::from_secs(10));

        let err = provider.artists_by_id(&["x".to_string()]).await.unwrap_err();

        assert!(err.is_unavailable());
    }
}
