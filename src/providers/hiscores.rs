use anyhow::Result;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, instrument};

use crate::core::cache::Cache;
use crate::core::config::HiscoresProviderConfig;
use crate::core::{
    AccountVariant, Clock, FetchError, Snapshot, SnapshotBuilder, SnapshotFetcher, Source,
    entity_key,
};
use crate::providers::util::{Backoff, with_backoff};

/// Hiscores entry names, exactly as the JSON API spells them, mapped to
/// internal metric keys.
const NAME_TO_KEY: &[(&str, &str)] = &[
    // Skills
    ("Overall", "overall"),
    ("Attack", "attack"),
    ("Defence", "defence"),
    ("Strength", "strength"),
    ("Hitpoints", "hitpoints"),
    ("Ranged", "ranged"),
    ("Prayer", "prayer"),
    ("Magic", "magic"),
    ("Cooking", "cooking"),
    ("Woodcutting", "woodcutting"),
    ("Fletching", "fletching"),
    ("Fishing", "fishing"),
    ("Firemaking", "firemaking"),
    ("Crafting", "crafting"),
    ("Smithing", "smithing"),
    ("Mining", "mining"),
    ("Herblore", "herblore"),
    ("Agility", "agility"),
    ("Thieving", "thieving"),
    ("Slayer", "slayer"),
    ("Farming", "farming"),
    ("Runecraft", "runecraft"),
    ("Hunter", "hunter"),
    ("Construction", "construction"),
    ("Sailing", "sailing"),
    // Activities, including legacy tables
    ("Grid Points", "grid_points"),
    ("League Points", "league_points"),
    ("Deadman Points", "deadman_points"),
    ("Bounty Hunter - Hunter", "bounty_hunter_hunter"),
    ("Bounty Hunter - Rogue", "bounty_hunter_rogue"),
    ("Bounty Hunter (Legacy) - Hunter", "bounty_hunter_legacy_hunter"),
    ("Bounty Hunter (Legacy) - Rogue", "bounty_hunter_legacy_rogue"),
    ("Clue Scrolls (all)", "clue_all"),
    ("Clue Scrolls (beginner)", "clue_beginner"),
    ("Clue Scrolls (easy)", "clue_easy"),
    ("Clue Scrolls (medium)", "clue_medium"),
    ("Clue Scrolls (hard)", "clue_hard"),
    ("Clue Scrolls (elite)", "clue_elite"),
    ("Clue Scrolls (master)", "clue_master"),
    ("LMS - Rank", "lms"),
    ("PvP Arena - Rank", "pvp_arena"),
    ("Soul Wars Zeal", "soul_wars"),
    ("Rifts closed", "rifts_closed"),
    ("Colosseum Glory", "colosseum_glory"),
    ("Collections Logged", "collections_logged"),
    // Bosses
    ("Abyssal Sire", "abyssal_sire"),
    ("Alchemical Hydra", "alchemical_hydra"),
    ("Amoxliatl", "amoxliatl"),
    ("Araxxor", "araxxor"),
    ("Artio", "artio"),
    ("Barrows Chests", "barrows"),
    ("Bryophyta", "bryophyta"),
    ("Callisto", "callisto"),
    ("Calvar'ion", "calvarion"),
    ("Cerberus", "cerberus"),
    ("Chambers of Xeric", "chambers_of_xeric"),
    ("Chambers of Xeric: Challenge Mode", "chambers_of_xeric_cm"),
    ("Chaos Elemental", "chaos_elemental"),
    ("Chaos Fanatic", "chaos_fanatic"),
    ("Commander Zilyana", "commander_zilyana"),
    ("Corporeal Beast", "corporeal_beast"),
    ("Crazy Archaeologist", "crazy_archaeologist"),
    ("Dagannoth Prime", "dagannoth_prime"),
    ("Dagannoth Rex", "dagannoth_rex"),
    ("Dagannoth Supreme", "dagannoth_supreme"),
    ("Deranged Archaeologist", "deranged_archaeologist"),
    ("Doom of Mokhaiotl", "doom_of_mokhaiotl"),
    ("Duke Sucellus", "duke_sucellus"),
    ("General Graardor", "general_graardor"),
    ("Giant Mole", "giant_mole"),
    ("Grotesque Guardians", "grotesque_guardians"),
    ("Hespori", "hespori"),
    ("Kalphite Queen", "kalphite_queen"),
    ("King Black Dragon", "king_black_dragon"),
    ("Kraken", "kraken"),
    ("Kree'Arra", "kreearra"),
    ("K'ril Tsutsaroth", "kril_tsutsaroth"),
    ("Lunar Chests", "lunar_chests"),
    ("Mimic", "mimic"),
    ("Nex", "nex"),
    ("Nightmare", "nightmare"),
    ("Phosani's Nightmare", "phosanis_nightmare"),
    ("Obor", "obor"),
    ("Phantom Muspah", "phantom_muspah"),
    ("Sarachnis", "sarachnis"),
    ("Scorpia", "scorpia"),
    ("Scurrius", "scurrius"),
    ("Shellbane Gryphon", "shellbane_gryphon"),
    ("Skotizo", "skotizo"),
    ("Sol Heredit", "sol_heredit"),
    ("Spindel", "spindel"),
    ("Tempoross", "tempoross"),
    ("The Gauntlet", "the_gauntlet"),
    ("The Corrupted Gauntlet", "the_corrupted_gauntlet"),
    ("The Hueycoatl", "the_hueycoatl"),
    ("The Leviathan", "the_leviathan"),
    ("The Royal Titans", "the_royal_titans"),
    ("The Whisperer", "the_whisperer"),
    ("Theatre of Blood", "theatre_of_blood"),
    ("Theatre of Blood: Hard Mode", "theatre_of_blood_hm"),
    ("Thermonuclear Smoke Devil", "thermonuclear_smoke_devil"),
    ("Tombs of Amascut", "tombs_of_amascut"),
    ("Tombs of Amascut: Expert Mode", "tombs_of_amascut_expert"),
    ("TzKal-Zuk", "tzkal_zuk"),
    ("TzTok-Jad", "tztok_jad"),
    ("Vardorvis", "vardorvis"),
    ("Venenatis", "venenatis"),
    ("Vet'ion", "vetion"),
    ("Vorkath", "vorkath"),
    ("Wintertodt", "wintertodt"),
    ("Yama", "yama"),
    ("Zalcano", "zalcano"),
    ("Zulrah", "zulrah"),
];

static NAME_TO_KEY_MAP: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| NAME_TO_KEY.iter().copied().collect());

/// Internal metric key for a hiscores entry name, if it is one we track.
pub fn metric_key(name: &str) -> Option<&'static str> {
    NAME_TO_KEY_MAP.get(name).copied()
}

/// Hiscores display name of an internal metric key.
pub fn metric_name(key: &str) -> Option<&'static str> {
    NAME_TO_KEY.iter().find(|(_, k)| *k == key).map(|(name, _)| *name)
}

/// Position of a metric key in hiscores order: skills, then activities, then bosses.
pub fn metric_position(key: &str) -> Option<usize> {
    NAME_TO_KEY.iter().position(|(_, k)| *k == key)
}

#[derive(Deserialize, Debug)]
struct HiscoresResponse {
    #[serde(default)]
    skills: Vec<SkillEntry>,
    #[serde(default)]
    activities: Vec<ActivityEntry>,
}

#[derive(Deserialize, Debug)]
struct SkillEntry {
    name: String,
    rank: i32,
    level: i32,
    xp: i64,
}

#[derive(Deserialize, Debug)]
struct ActivityEntry {
    name: String,
    rank: i32,
    score: i64,
}

/// Fetches snapshots from the hiscores JSON API, absorbing bursts with a
/// short-lived cache and backing off when rate limited.
pub struct HiscoresClient {
    base_url: String,
    client: reqwest::Client,
    cache: Cache<(String, AccountVariant), Snapshot>,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
}

impl HiscoresClient {
    pub fn new(config: &HiscoresProviderConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("xptrack/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HiscoresClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            cache: Cache::new(config.cache_ttl()),
            backoff: Backoff::new(config.initial_backoff(), config.max_attempts),
            clock,
        })
    }

    async fn fetch_once(&self, player: &str, url: &Url) -> Result<Snapshot, FetchError> {
        debug!("Requesting hiscores from {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::transient(player, None, format!("Request error: {e}")))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(FetchError::NotFound {
                    player: player.to_string(),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(FetchError::RateLimited {
                    player: player.to_string(),
                });
            }
            s if !s.is_success() => {
                return Err(FetchError::transient(
                    player,
                    Some(s.as_u16()),
                    format!("HTTP error: {s}"),
                ));
            }
            _ => {}
        }

        let body = response.text().await.map_err(|e| {
            FetchError::transient(player, Some(status.as_u16()), format!("Body error: {e}"))
        })?;
        debug!("Received hiscores response ({} bytes)", body.len());

        self.parse(player, &body)
    }

    fn parse(&self, player: &str, body: &str) -> Result<Snapshot, FetchError> {
        let data: HiscoresResponse = serde_json::from_str(body).map_err(|e| {
            FetchError::transient(player, None, format!("Failed to parse JSON response: {e}"))
        })?;

        let mut builder =
            SnapshotBuilder::new(player.trim(), self.clock.now_millis(), Source::RemoteApi);
        for skill in &data.skills {
            match metric_key(&skill.name) {
                Some(key) => builder = builder.leveled(key, skill.rank, skill.level, skill.xp),
                None => debug!("Unknown skill in hiscores: {}", skill.name),
            }
        }
        for activity in &data.activities {
            match metric_key(&activity.name) {
                Some(key) => builder = builder.count(key, activity.rank, activity.score),
                None => debug!("Unknown activity in hiscores: {}", activity.name),
            }
        }
        debug!("Parsed {} metrics for '{}'", builder.metric_count(), player);

        Ok(builder.build())
    }
}

#[async_trait]
impl SnapshotFetcher for HiscoresClient {
    #[instrument(
        name = "HiscoresFetch",
        skip(self),
        fields(player = %player, variant = %variant)
    )]
    async fn fetch(&self, player: &str, variant: AccountVariant) -> Result<Snapshot, FetchError> {
        let cache_key = (entity_key(player), variant);
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let endpoint = format!("{}/{}/index_lite.json", self.base_url, variant.endpoint());
        let url = Url::parse_with_params(&endpoint, &[("player", player.trim())])
            .map_err(|e| FetchError::transient(player, None, format!("Invalid URL: {e}")))?;

        let snapshot = with_backoff(|| self.fetch_once(player, &url), self.backoff).await?;

        self.cache.put(cache_key, snapshot.clone()).await;
        Ok(snapshot)
    }
}
