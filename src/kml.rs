//! KML point/line capture
//!
//! Per-user accumulator of named points and polylines. States are
//! `NoActiveLine` and `ActiveLine(name, points)`:
//!
//! | command       | NoActiveLine              | ActiveLine                  |
//! |---------------|---------------------------|-----------------------------|
//! | `start_line`  | -> ActiveLine             | rejected                    |
//! | `add_point`   | saves a standalone point  | appends a vertex            |
//! | `end_line`    | rejected                  | commits if >= 2 points      |
//! | `cancel_line` | rejected                  | -> NoActiveLine             |
//!
//! Rejections never mutate state. The accumulator is persisted as JSON in
//! the user's `kml/` directory after every change.

use anyhow::Context;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::error::{BotError, BotResult};
use crate::mode::UserId;
use crate::storage::{UserLocks, UserStorage};
use crate::users::Feature;

const STATE_FILE: &str = "state.json";
const EXPORT_FILE: &str = "export.kml";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// KML order is lon,lat
    fn to_kml(self) -> String {
        format!("{},{},0", self.longitude, self.latitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPoint {
    pub name: String,
    pub coordinate: Coordinate,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub name: String,
    pub points: Vec<Coordinate>,
}

/// Result of feeding a location into the accumulator
#[derive(Debug, Clone, PartialEq)]
pub enum PointOutcome {
    Standalone(NamedPoint),
    Vertex { line: String, count: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KmlAccumulator {
    #[serde(default)]
    pub points: Vec<NamedPoint>,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub active_line: Option<Line>,
    #[serde(default)]
    pub default_name: Option<String>,
    #[serde(default)]
    pub next_point_name: Option<String>,
    #[serde(default)]
    ordinal: u64,
}

impl KmlAccumulator {
    pub fn start_line(&mut self, name: &str) -> BotResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BotError::invalid("Give the line a name: /startline <name>"));
        }
        if let Some(active) = &self.active_line {
            return Err(BotError::invalid(format!(
                "You already have an active line named {} ({} points). Finish it with /endline or cancel it with /cancelline first.",
                active.name,
                active.points.len()
            )));
        }
        self.active_line = Some(Line {
            name: name.to_string(),
            points: Vec::new(),
        });
        Ok(())
    }

    /// Name priority for standalone points: explicit, queued next name,
    /// default name, then `Point <n>`.
    pub fn add_point(&mut self, coordinate: Coordinate, explicit: Option<&str>) -> PointOutcome {
        if let Some(line) = self.active_line.as_mut() {
            line.points.push(coordinate);
            return PointOutcome::Vertex {
                line: line.name.clone(),
                count: line.points.len(),
            };
        }

        let explicit = explicit.map(str::trim).filter(|n| !n.is_empty());
        let name = match (explicit, self.next_point_name.take(), &self.default_name) {
            (Some(name), queued, _) => {
                self.next_point_name = queued;
                name.to_string()
            }
            (None, Some(queued), _) => queued,
            (None, None, Some(default)) => default.clone(),
            (None, None, None) => {
                self.ordinal += 1;
                format!("Point {}", self.ordinal)
            }
        };

        let point = NamedPoint {
            name,
            coordinate,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.points.push(point.clone());
        PointOutcome::Standalone(point)
    }

    pub fn end_line(&mut self) -> BotResult<Line> {
        let Some(active) = &self.active_line else {
            return Err(BotError::invalid(
                "No active line. Start one with /startline <name>.",
            ));
        };
        if active.points.len() < 2 {
            return Err(BotError::invalid(format!(
                "Line {} has {} point(s); a line needs at least 2. Send more locations or /cancelline.",
                active.name,
                active.points.len()
            )));
        }

        let line = self.active_line.take().ok_or_else(|| {
            BotError::invalid("No active line. Start one with /startline <name>.")
        })?;
        self.lines.push(line.clone());
        Ok(line)
    }

    pub fn cancel_line(&mut self) -> BotResult<Line> {
        self.active_line
            .take()
            .ok_or_else(|| BotError::invalid("No active line to cancel."))
    }

    /// `None` or a blank name clears the default
    pub fn set_default_name(&mut self, name: Option<&str>) {
        self.default_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
    }

    /// Name for the next standalone point only
    pub fn queue_next_name(&mut self, name: &str) {
        let name = name.trim();
        self.next_point_name = (!name.is_empty()).then(|| name.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.lines.is_empty() && self.active_line.is_none()
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "KML: {} point(s), {} line(s)",
            self.points.len(),
            self.lines.len()
        );
        match &self.active_line {
            Some(line) => out.push_str(&format!(
                "\nActive line: {} ({} points)",
                line.name,
                line.points.len()
            )),
            None => out.push_str("\nNo active line"),
        }
        if let Some(name) = &self.default_name {
            out.push_str(&format!("\nDefault point name: {}", name));
        }
        if let Some(name) = &self.next_point_name {
            out.push_str(&format!("\nNext point name: {}", name));
        }
        out
    }

    /// Render saved points and lines as a KML document. The active line is
    /// not exported until it is committed.
    pub fn to_kml(&self, document_name: &str) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(
            BytesStart::new("kml").with_attributes([("xmlns", "http://www.opengis.net/kml/2.2")]),
        ))?;
        writer.write_event(Event::Start(BytesStart::new("Document")))?;
        write_text_element(&mut writer, "name", document_name)?;

        for point in &self.points {
            writer.write_event(Event::Start(BytesStart::new("Placemark")))?;
            write_text_element(&mut writer, "name", &point.name)?;
            writer.write_event(Event::Start(BytesStart::new("Point")))?;
            write_text_element(&mut writer, "coordinates", &point.coordinate.to_kml())?;
            writer.write_event(Event::End(BytesEnd::new("Point")))?;
            writer.write_event(Event::End(BytesEnd::new("Placemark")))?;
        }

        for line in &self.lines {
            let coordinates = line
                .points
                .iter()
                .map(|c| c.to_kml())
                .collect::<Vec<_>>()
                .join(" ");
            writer.write_event(Event::Start(BytesStart::new("Placemark")))?;
            write_text_element(&mut writer, "name", &line.name)?;
            writer.write_event(Event::Start(BytesStart::new("LineString")))?;
            write_text_element(&mut writer, "tessellate", "1")?;
            write_text_element(&mut writer, "coordinates", &coordinates)?;
            writer.write_event(Event::End(BytesEnd::new("LineString")))?;
            writer.write_event(Event::End(BytesEnd::new("Placemark")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("Document")))?;
        writer.write_event(Event::End(BytesEnd::new("kml")))?;

        String::from_utf8(writer.into_inner()).context("KML output is not UTF-8")
    }
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> anyhow::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Persistent per-user KML accumulators
pub struct KmlStore {
    storage: UserStorage,
    locks: UserLocks,
}

impl KmlStore {
    pub fn new(storage: UserStorage) -> Self {
        Self {
            storage,
            locks: UserLocks::default(),
        }
    }

    pub async fn load(&self, user_id: UserId) -> BotResult<KmlAccumulator> {
        self.storage.load_json(user_id, Feature::Kml, STATE_FILE).await
    }

    /// Load, apply `f`, and save only if `f` succeeded
    pub async fn update<T, F>(&self, user_id: UserId, f: F) -> BotResult<T>
    where
        F: FnOnce(&mut KmlAccumulator) -> BotResult<T>,
    {
        let _guard = self.locks.lock(user_id).await;
        let mut acc = self.load(user_id).await?;
        let out = f(&mut acc)?;
        self.storage
            .save_json(user_id, Feature::Kml, STATE_FILE, &acc)
            .await?;
        Ok(out)
    }

    /// Write `export.kml` and return its path
    pub async fn export(&self, user_id: UserId) -> anyhow::Result<PathBuf> {
        let acc = self.load(user_id).await?;
        let document = acc.to_kml(&format!("user_{}", user_id))?;
        let dir = self
            .storage
            .ensure_user_feature_dir(user_id, Feature::Kml)
            .await?;
        let path = dir.join(EXPORT_FILE);
        tokio::fs::write(&path, document)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(
            "Exported KML for user {}: {} points, {} lines",
            user_id,
            acc.points.len(),
            acc.lines.len()
        );
        Ok(path)
    }

    pub async fn clear(&self, user_id: UserId) -> BotResult<()> {
        let _guard = self.locks.lock(user_id).await;
        self.storage.remove(user_id, Feature::Kml, STATE_FILE).await?;
        self.storage.remove(user_id, Feature::Kml, EXPORT_FILE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon)
    }

    #[test]
    fn test_queued_name_then_ordinal_fallback() {
        let mut acc = KmlAccumulator::default();
        acc.queue_next_name("Home");

        let first = acc.add_point(at(-7.25, 112.77), None);
        match first {
            PointOutcome::Standalone(p) => {
                assert_eq!(p.name, "Home");
                assert_eq!(p.coordinate, at(-7.25, 112.77));
            }
            other => panic!("unexpected {:?}", other),
        }

        let second = acc.add_point(at(-7.26, 112.78), None);
        assert!(matches!(second, PointOutcome::Standalone(p) if p.name == "Point 1"));
    }

    #[test]
    fn test_name_priority() {
        let mut acc = KmlAccumulator::default();
        acc.set_default_name(Some("Tiang"));
        acc.queue_next_name("Gardu");

        // Explicit beats queued and leaves the queued name for later
        let p = acc.add_point(at(0.0, 0.0), Some("Pos"));
        assert!(matches!(p, PointOutcome::Standalone(p) if p.name == "Pos"));
        let p = acc.add_point(at(0.0, 0.0), None);
        assert!(matches!(p, PointOutcome::Standalone(p) if p.name == "Gardu"));
        let p = acc.add_point(at(0.0, 0.0), None);
        assert!(matches!(p, PointOutcome::Standalone(p) if p.name == "Tiang"));

        acc.set_default_name(Some("  "));
        assert!(acc.default_name.is_none());
    }

    #[test]
    fn test_start_line_while_active_is_rejected() {
        let mut acc = KmlAccumulator::default();
        acc.start_line("Road").unwrap();
        acc.add_point(at(1.0, 1.0), None);

        let err = acc.start_line("River").unwrap_err();
        assert!(err.user_message().contains("active line named Road"));
        let active = acc.active_line.as_ref().unwrap();
        assert_eq!(active.name, "Road");
        assert_eq!(active.points, vec![at(1.0, 1.0)]);
    }

    #[test]
    fn test_end_line_needs_two_points() {
        let mut acc = KmlAccumulator::default();
        assert!(acc.end_line().is_err());

        acc.start_line("Road").unwrap();
        let vertex = acc.add_point(at(1.0, 1.0), Some("ignored"));
        assert_eq!(
            vertex,
            PointOutcome::Vertex {
                line: "Road".into(),
                count: 1
            }
        );
        let before = acc.clone();

        let err = acc.end_line().unwrap_err();
        assert!(matches!(err, BotError::InvalidStateTransition(_)));
        assert_eq!(acc, before);

        acc.add_point(at(2.0, 2.0), None);
        let line = acc.end_line().unwrap();
        assert_eq!(line.points.len(), 2);
        assert!(acc.active_line.is_none());
        assert_eq!(acc.lines.len(), 1);
        assert!(acc.points.is_empty());
    }

    #[test]
    fn test_cancel_line_discards() {
        let mut acc = KmlAccumulator::default();
        assert!(acc.cancel_line().is_err());
        acc.start_line("Fence").unwrap();
        acc.add_point(at(1.0, 1.0), None);
        assert_eq!(acc.cancel_line().unwrap().name, "Fence");
        assert!(acc.active_line.is_none());
        assert!(acc.lines.is_empty());
    }

    #[test]
    fn test_kml_document() {
        let mut acc = KmlAccumulator::default();
        acc.add_point(at(-7.25, 112.77), Some("Home & Office"));
        acc.start_line("Road").unwrap();
        acc.add_point(at(-7.0, 112.0), None);
        acc.add_point(at(-7.1, 112.1), None);
        acc.end_line().unwrap();

        let kml = acc.to_kml("survey").unwrap();
        assert!(kml.starts_with("<?xml"));
        assert!(kml.contains("<name>Home &amp; Office</name>"));
        assert!(kml.contains("<coordinates>112.77,-7.25,0</coordinates>"));
        assert!(kml.contains("<coordinates>112,-7,0 112.1,-7.1,0</coordinates>"));
        assert!(kml.contains("<LineString>"));
    }

    #[tokio::test]
    async fn test_store_persists_and_skips_failed_updates() {
        let tmp = TempDir::new().unwrap();
        let store = KmlStore::new(UserStorage::new(tmp.path()));

        store
            .update(5, |acc| {
                acc.start_line("Road")?;
                acc.add_point(at(1.0, 1.0), None);
                Ok(())
            })
            .await
            .unwrap();

        let err = store.update(5, |acc| acc.end_line()).await.unwrap_err();
        assert!(err.is_rejection());

        let acc = store.load(5).await.unwrap();
        assert_eq!(acc.active_line.unwrap().points.len(), 1);

        let path = store.export(5).await.unwrap();
        assert!(path.ends_with("user_5/kml/export.kml"));

        store.clear(5).await.unwrap();
        assert!(store.load(5).await.unwrap().is_empty());
    }
}
