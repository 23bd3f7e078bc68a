use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::provider::OddsFeed;
use crate::error::FeedError;
use crate::models::{normalize_book, BookmakerQuote, HorseEntry, Race};

/// Odds feed backed by the racing odds REST API.
pub struct RacingApiClient {
    http: Client,
    url: Url,
}

impl RacingApiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let url = Url::parse_with_params(base_url, &[("apiKey", api_key), ("format", "json")])
            .with_context(|| format!("Invalid racing API URL: {}", base_url))?;
        Ok(RacingApiClient { http, url })
    }
}

#[async_trait]
impl OddsFeed for RacingApiClient {
    fn name(&self) -> &str {
        "RacingAPI"
    }

    async fn fetch_snapshot(&self) -> Result<Value, FeedError> {
        // Never log the full URL, it carries the API key
        debug!("Fetching racing odds from {}", self.url.path());

        let resp = self.http.get(self.url.clone()).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status { status, body });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| FeedError::Decode(e.to_string()))
    }
}

/// Races parsed from one snapshot plus everything that had to be dropped.
#[derive(Debug, Default)]
pub struct NormalizedSnapshot {
    pub races: Vec<Race>,
    pub errors: Vec<FeedError>,
}

/// Convert a raw feed response into races, horses and quotes.
///
/// Bad races and horses are dropped individually and reported in `errors`;
/// a horse without odds is kept with no quotes.
pub fn normalize_snapshot(raw: &Value, feed_tz: Tz) -> NormalizedSnapshot {
    let mut out = NormalizedSnapshot::default();

    let items = match raw.as_array() {
        Some(a) => a,
        // Some deployments wrap the list: { "races": [...] }
        None => match raw.get("races").and_then(|v| v.as_array()) {
            Some(a) => a,
            None => {
                out.errors.push(FeedError::MalformedSnapshot);
                return out;
            }
        },
    };

    for item in items {
        match parse_race(item, feed_tz, &mut out.errors) {
            Ok(race) => out.races.push(race),
            Err(e) => out.errors.push(e),
        }
    }

    out
}

// ── Parsing helpers ────────────────────────────────────────────────────────────

fn parse_race(item: &Value, feed_tz: Tz, errors: &mut Vec<FeedError>) -> Result<Race, FeedError> {
    let id = value_as_id(&item["id"]).ok_or_else(|| FeedError::MalformedRace {
        race_id: "<unknown>".into(),
        reason: "missing id".into(),
    })?;

    let start_raw = item["start_time"]
        .as_str()
        .ok_or_else(|| FeedError::MalformedRace {
            race_id: id.clone(),
            reason: "missing start_time".into(),
        })?;
    let start_time = parse_start_time(start_raw, feed_tz).map_err(|reason| {
        FeedError::MalformedRace {
            race_id: id.clone(),
            reason,
        }
    })?;

    let name = item["name"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());

    let horses = item["horses"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|h| match parse_horse(h) {
                    Some(horse) => Some(horse),
                    None => {
                        errors.push(FeedError::MalformedHorse {
                            race_id: id.clone(),
                            reason: "runner has neither id nor name".into(),
                        });
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Race {
        id,
        name,
        start_time,
        horses,
    })
}

fn parse_horse(item: &Value) -> Option<HorseEntry> {
    let id = value_as_id(&item["id"]);
    let name = item["name"].as_str().map(str::to_string);
    let (id, name) = match (id, name) {
        (Some(id), Some(name)) => (id, name),
        (Some(id), None) => (id.clone(), id),
        (None, Some(name)) => (name.clone(), name),
        (None, None) => return None,
    };

    Some(HorseEntry {
        id,
        name,
        quotes: parse_quotes(&item["odds"]),
    })
}

fn parse_quotes(odds: &Value) -> Vec<BookmakerQuote> {
    let quotes: Vec<BookmakerQuote> = if let Some(map) = odds.as_object() {
        // Object form: { "TAB": 5.5, "Sportsbet": "5.2" }, key order is feed order
        map.iter()
            .filter_map(|(book, price)| valid_price(price).map(|p| BookmakerQuote::new(book, p)))
            .collect()
    } else if let Some(list) = odds.as_array() {
        // Array form: [{ "bookmaker": "TAB", "price": 5.5 }, ...]
        list.iter()
            .filter_map(|q| {
                let book = q["bookmaker"].as_str()?;
                let price = valid_price(&q["price"])?;
                Some(BookmakerQuote::new(book, price))
            })
            .collect()
    } else {
        vec![]
    };

    first_quote_per_book(quotes)
}

/// One quote per bookmaker (names compared case-insensitively); the first
/// valid quote in feed order wins.
fn first_quote_per_book(quotes: Vec<BookmakerQuote>) -> Vec<BookmakerQuote> {
    let mut seen = HashSet::new();
    quotes
        .into_iter()
        .filter(|q| seen.insert(normalize_book(&q.bookmaker)))
        .collect()
}

fn valid_price(v: &Value) -> Option<f64> {
    let price = v
        .as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))?;
    (price.is_finite() && price > 1.0).then_some(price)
}

fn value_as_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an ISO-8601 start time. Timestamps without an offset are local to
/// `feed_tz`.
pub fn parse_start_time(raw: &str, feed_tz: Tz) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = raw
        .parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map_err(|e| format!("unparseable start_time '{}': {}", raw, e))?;

    feed_tz
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("start_time '{}' does not exist in {:?}", raw, feed_tz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Australia::Sydney;
    use serde_json::json;

    #[test]
    fn test_parse_object_odds_in_feed_order() {
        let raw = json!([{
            "id": "r1",
            "name": "Randwick R1",
            "start_time": "2026-03-01T12:00:00Z",
            "horses": [{
                "id": 7,
                "name": "Fast Lad",
                "odds": { "Sportsbet": 5.2, "TAB": "5.0", "Neds": 4.8 }
            }]
        }]);
        let snap = normalize_snapshot(&raw, Sydney);
        assert!(snap.errors.is_empty());
        let horse = &snap.races[0].horses[0];
        assert_eq!(horse.id, "7");
        let books: Vec<&str> = horse.quotes.iter().map(|q| q.bookmaker.as_str()).collect();
        assert_eq!(books, vec!["Sportsbet", "TAB", "Neds"]);
        assert_eq!(horse.quotes[1].price, 5.0);
    }

    #[test]
    fn test_parse_array_odds_and_wrapped_snapshot() {
        let raw = json!({ "races": [{
            "id": 42,
            "start_time": "2026-03-01T12:00:00+11:00",
            "horses": [{
                "name": "Quiet Storm",
                "odds": [
                    { "bookmaker": "TAB", "price": 3.5 },
                    { "bookmaker": "Ladbrokes" },
                    { "bookmaker": "Neds", "price": 3.6 }
                ]
            }]
        }]});
        let snap = normalize_snapshot(&raw, Sydney);
        let race = &snap.races[0];
        assert_eq!(race.id, "42");
        assert_eq!(race.name, "42");
        assert_eq!(race.start_time, Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap());
        let horse = &race.horses[0];
        assert_eq!(horse.id, "Quiet Storm");
        assert_eq!(horse.quotes.len(), 2);
    }

    #[test]
    fn test_bad_start_time_drops_only_that_race() {
        let raw = json!([
            { "id": "bad", "name": "Bad", "start_time": "tomorrow-ish", "horses": [] },
            { "id": "good", "name": "Good", "start_time": "2026-03-01T12:00:00Z", "horses": [] }
        ]);
        let snap = normalize_snapshot(&raw, Sydney);
        assert_eq!(snap.races.len(), 1);
        assert_eq!(snap.races[0].id, "good");
        assert_eq!(snap.errors.len(), 1);
        assert!(matches!(
            &snap.errors[0],
            FeedError::MalformedRace { race_id, .. } if race_id == "bad"
        ));
    }

    #[test]
    fn test_missing_odds_and_invalid_prices_are_tolerated() {
        let raw = json!([{
            "id": "r1",
            "name": "R1",
            "start_time": "2026-03-01T12:00:00Z",
            "horses": [
                { "id": "h1", "name": "No Odds" },
                { "id": "h2", "name": "Junk", "odds": { "A": 1.0, "B": -3, "C": "abc", "D": 2.5 } },
                { "odds": { "A": 3.0 } }
            ]
        }]);
        let snap = normalize_snapshot(&raw, Sydney);
        let horses = &snap.races[0].horses;
        assert_eq!(horses.len(), 2);
        assert!(horses[0].quotes.is_empty());
        assert_eq!(horses[1].quotes, vec![BookmakerQuote::new("D", 2.5)]);
        assert_eq!(snap.errors.len(), 1);
        assert!(matches!(snap.errors[0], FeedError::MalformedHorse { .. }));
    }

    #[test]
    fn test_repeated_bookmaker_keeps_first_quote() {
        let raw = json!([{
            "id": "r1",
            "name": "R1",
            "start_time": "2026-03-01T12:00:00Z",
            "horses": [
                {
                    "id": "h1",
                    "odds": [
                        { "bookmaker": "TAB", "price": 5.0 },
                        { "bookmaker": "TAB", "price": 5.4 },
                        { "bookmaker": "Longshot", "price": 6.0 },
                        { "bookmaker": " tab ", "price": 5.8 }
                    ]
                },
                {
                    "id": "h2",
                    "odds": { "Sportsbet": 0.5, "SPORTSBET": 4.0, "sportsbet": 4.4 }
                }
            ]
        }]);
        let snap = normalize_snapshot(&raw, Sydney);
        let horses = &snap.races[0].horses;
        assert_eq!(
            horses[0].quotes,
            vec![BookmakerQuote::new("TAB", 5.0), BookmakerQuote::new("Longshot", 6.0)]
        );
        // An invalid price does not claim the bookmaker's slot
        assert_eq!(horses[1].quotes, vec![BookmakerQuote::new("SPORTSBET", 4.0)]);
    }

    #[test]
    fn test_naive_start_time_is_feed_local() {
        // Sydney is UTC+11 in March (daylight saving)
        let t = parse_start_time("2026-03-01T14:30:00", Sydney).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2026, 3, 1, 3, 30, 0).unwrap());
        let t = parse_start_time("2026-03-01 14:30:00", Sydney).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2026, 3, 1, 3, 30, 0).unwrap());
    }

    #[test]
    fn test_unrecognised_snapshot_shape() {
        let snap = normalize_snapshot(&json!({ "status": "ok" }), Sydney);
        assert!(snap.races.is_empty());
        assert!(matches!(snap.errors[0], FeedError::MalformedSnapshot));
    }

    #[test]
    fn test_client_url_carries_key_and_format() {
        let client = RacingApiClient::new(
            "https://api.example.com/au/racing/odds",
            "secret key",
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(
            client.url.as_str(),
            "https://api.example.com/au/racing/odds?apiKey=secret+key&format=json"
        );
    }
}
