//! Region hierarchy: zones (`centers`) -> offices (`offices`) -> fine areas (`class10s`).
//!
//! The catalog is built once from the upstream area document and is read-only
//! afterwards. Ownership of fine areas is resolved through an inverted index
//! built at load time.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tenki_core::ReqwestErrorExt;
use tracing::instrument;

use crate::error::ForecastError;
use crate::types::{AreaEntry, OfficeGroup, RegionLevel, RegionNode, ZoneGroup};

const ZONES_KEY: &str = "centers";
const OFFICES_KEY: &str = "offices";
const FINE_AREAS_KEY: &str = "class10s";

/// Where a catalog is read from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// Area document fetched over HTTP
    Url(String),
    /// Area document already in memory
    Json(String),
}

/// Entry as declared in one of the three groups.
struct DeclaredEntry {
    id: String,
    name: String,
    parent: Option<String>,
    children: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RegionCatalog {
    nodes: Vec<RegionNode>,
    by_key: HashMap<(RegionLevel, String), usize>,
    children: HashMap<(RegionLevel, String), Vec<String>>,
    zone_order: Vec<String>,
    office_of: HashMap<String, String>,
}

impl RegionCatalog {
    /// Load a catalog from either source.
    pub async fn load(
        client: &reqwest::Client,
        source: &CatalogSource,
    ) -> Result<Self, ForecastError> {
        match source {
            CatalogSource::Url(url) => Self::fetch(client, url).await,
            CatalogSource::Json(text) => Self::from_json(text),
        }
    }

    /// Fetch and parse the area document with a single request.
    #[instrument(skip(client), level = "info")]
    pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<Self, ForecastError> {
        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ForecastError::CatalogLoad(e.into_network_error().to_string()))?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| ForecastError::CatalogLoad(format!("area document is not JSON: {}", e)))?;

        let catalog = Self::from_value(&value)?;
        tracing::info!("Loaded region catalog with {} regions", catalog.len());
        Ok(catalog)
    }

    pub fn from_json(text: &str) -> Result<Self, ForecastError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ForecastError::CatalogLoad(format!("area document is not JSON: {}", e)))?;
        Self::from_value(&value)
    }

    /// Build the tree from a parsed area document.
    ///
    /// A missing top-level group is fatal; a malformed entry inside a group is skipped.
    pub fn from_value(value: &Value) -> Result<Self, ForecastError> {
        let root = value.as_object().ok_or_else(|| {
            ForecastError::CatalogLoad("area document is not a JSON object".to_string())
        })?;

        let zones = declared_entries(group(root, ZONES_KEY)?, ZONES_KEY);
        let offices = declared_entries(group(root, OFFICES_KEY)?, OFFICES_KEY);
        let fine_areas = declared_entries(group(root, FINE_AREAS_KEY)?, FINE_AREAS_KEY);

        let mut catalog = Self::default();

        let mut zone_of_office: HashMap<&str, &str> = HashMap::new();
        for zone in &zones {
            for office_id in &zone.children {
                zone_of_office
                    .entry(office_id.as_str())
                    .or_insert(zone.id.as_str());
            }
        }

        // First declaring office wins; later claims are data inconsistencies.
        for office in &offices {
            for area_id in &office.children {
                match catalog.office_of.get(area_id) {
                    Some(owner) if owner != &office.id => {
                        tracing::debug!(
                            "Fine area {} also listed by office {}, keeping {}",
                            area_id,
                            office.id,
                            owner
                        );
                    }
                    Some(_) => {}
                    None => {
                        catalog.office_of.insert(area_id.clone(), office.id.clone());
                    }
                }
            }
        }

        for zone in &zones {
            catalog.zone_order.push(zone.id.clone());
            catalog.insert(zone, RegionLevel::Zone, None);
        }
        for office in &offices {
            let parent = zone_of_office
                .get(office.id.as_str())
                .map(|z| z.to_string())
                .or_else(|| office.parent.clone());
            catalog.insert(office, RegionLevel::Office, parent);
        }
        for area in &fine_areas {
            let parent = catalog
                .office_of
                .get(&area.id)
                .cloned()
                .or_else(|| area.parent.clone());
            catalog.insert(area, RegionLevel::FineArea, parent);
        }

        Ok(catalog)
    }

    fn insert(&mut self, entry: &DeclaredEntry, level: RegionLevel, parent_id: Option<String>) {
        let key = (level, entry.id.clone());
        if self.by_key.contains_key(&key) {
            tracing::debug!("Duplicate {:?} id {} ignored", level, entry.id);
            return;
        }
        self.by_key.insert(key.clone(), self.nodes.len());
        self.children.insert(key, entry.children.clone());
        self.nodes.push(RegionNode {
            id: entry.id.clone(),
            name: entry.name.clone(),
            parent_id,
            level,
        });
    }

    /// Office whose child list declares `fine_area_id`.
    ///
    /// An id no office declares is returned unchanged and treated as an office
    /// id by callers; the forecast fetch for it may then fail.
    pub fn find_parent_office<'a>(&'a self, fine_area_id: &'a str) -> &'a str {
        match self.office_of.get(fine_area_id) {
            Some(office_id) => office_id,
            None => {
                tracing::debug!(
                    "No office declares {}, using it as the office id",
                    fine_area_id
                );
                fine_area_id
            }
        }
    }

    /// Zone -> office -> fine-area projection in declaration order.
    pub fn build_index(&self) -> Vec<ZoneGroup> {
        self.zone_order
            .iter()
            .filter_map(|zone_id| self.node(RegionLevel::Zone, zone_id))
            .map(|zone| ZoneGroup {
                id: zone.id.clone(),
                name: zone.name.clone(),
                offices: self
                    .declared_children(RegionLevel::Zone, &zone.id)
                    .iter()
                    .filter_map(|office_id| self.node(RegionLevel::Office, office_id))
                    .map(|office| OfficeGroup {
                        id: office.id.clone(),
                        name: office.name.clone(),
                        areas: self
                            .declared_children(RegionLevel::Office, &office.id)
                            .iter()
                            .filter_map(|area_id| self.node(RegionLevel::FineArea, area_id))
                            .map(|area| AreaEntry {
                                id: area.id.clone(),
                                name: area.name.clone(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Look up a region by id, preferring the finest level.
    pub fn region(&self, id: &str) -> Option<&RegionNode> {
        [RegionLevel::FineArea, RegionLevel::Office, RegionLevel::Zone]
            .into_iter()
            .find_map(|level| self.node(level, id))
    }

    pub fn node(&self, level: RegionLevel, id: &str) -> Option<&RegionNode> {
        self.by_key
            .get(&(level, id.to_string()))
            .and_then(|&i| self.nodes.get(i))
    }

    fn declared_children(&self, level: RegionLevel, id: &str) -> &[String] {
        self.children
            .get(&(level, id.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> &[RegionNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn group<'a>(root: &'a Map<String, Value>, key: &str) -> Result<&'a Map<String, Value>, ForecastError> {
    root.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| ForecastError::CatalogLoad(format!("missing group '{}'", key)))
}

fn declared_entries(group: &Map<String, Value>, group_name: &str) -> Vec<DeclaredEntry> {
    group
        .iter()
        .filter_map(|(id, value)| {
            let entry = parse_entry(id, value);
            if entry.is_none() {
                tracing::debug!("Skipping malformed {} entry {}", group_name, id);
            }
            entry
        })
        .collect()
}

fn parse_entry(id: &str, value: &Value) -> Option<DeclaredEntry> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let children = match obj.get("children") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(_) => return None,
    };
    let parent = obj.get("parent").and_then(Value::as_str).map(str::to_string);

    Some(DeclaredEntry {
        id: id.to_string(),
        name,
        parent,
        children,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_document() -> Value {
        serde_json::json!({
            "centers": {
                "010300": {"name": "関東甲信地方", "children": ["130000", "140000"]},
                "010100": {"name": "北海道地方", "children": ["016000"]}
            },
            "offices": {
                "130000": {"name": "東京都", "parent": "010300", "children": ["130010", "130020"]},
                "140000": {"name": "神奈川県", "parent": "010300", "children": ["140010"]},
                "016000": {"name": "石狩・空知・後志地方", "parent": "010100", "children": ["016010"]}
            },
            "class10s": {
                "130020": {"name": "伊豆諸島北部", "parent": "130000"},
                "130010": {"name": "東京地方", "parent": "130000"},
                "140010": {"name": "東部", "parent": "140000"},
                "016010": {"name": "石狩地方", "parent": "016000"}
            }
        })
    }

    fn sample_catalog() -> RegionCatalog {
        RegionCatalog::from_value(&sample_document()).unwrap()
    }

    #[test]
    fn test_find_parent_office() {
        let catalog = sample_catalog();
        assert_eq!(catalog.find_parent_office("130010"), "130000");
        assert_eq!(catalog.find_parent_office("140010"), "140000");
    }

    #[test]
    fn test_parent_office_declares_every_fine_area() {
        let catalog = sample_catalog();
        let fine_areas: Vec<_> = catalog
            .nodes()
            .iter()
            .filter(|n| n.level == RegionLevel::FineArea)
            .collect();
        assert_eq!(fine_areas.len(), 4);

        for area in fine_areas {
            let office_id = catalog.find_parent_office(&area.id);
            let declared = catalog.declared_children(RegionLevel::Office, office_id);
            assert!(declared.contains(&area.id), "{} not under {}", area.id, office_id);
        }
    }

    #[test]
    fn test_unknown_fine_area_falls_back_to_itself() {
        let catalog = sample_catalog();
        assert_eq!(catalog.find_parent_office("999999"), "999999");
        // Office ids are not children of any office either
        assert_eq!(catalog.find_parent_office("130000"), "130000");
    }

    #[test]
    fn test_tree_parents() {
        let catalog = sample_catalog();
        let office = catalog.node(RegionLevel::Office, "130000").unwrap();
        assert_eq!(office.parent_id.as_deref(), Some("010300"));
        let area = catalog.node(RegionLevel::FineArea, "130020").unwrap();
        assert_eq!(area.parent_id.as_deref(), Some("130000"));
        let zone = catalog.node(RegionLevel::Zone, "010100").unwrap();
        assert!(zone.parent_id.is_none());
    }

    #[test]
    fn test_build_index_preserves_declaration_order() {
        let index = sample_catalog().build_index();

        let zone_ids: Vec<_> = index.iter().map(|z| z.id.as_str()).collect();
        assert_eq!(zone_ids, ["010300", "010100"]);

        let kanto = &index[0];
        let office_ids: Vec<_> = kanto.offices.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(office_ids, ["130000", "140000"]);

        // Follows the office's child list, not the class10s key order
        let tokyo_areas: Vec<_> = kanto.offices[0].areas.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(tokyo_areas, ["130010", "130020"]);
        assert_eq!(kanto.offices[0].areas[0].name, "東京地方");
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let mut doc = sample_document();
        doc["class10s"]["130020"] = serde_json::json!({"children": []});
        doc["offices"]["140000"]["children"] = serde_json::json!("140010");

        let catalog = RegionCatalog::from_value(&doc).unwrap();
        assert!(catalog.node(RegionLevel::FineArea, "130020").is_none());
        assert!(catalog.node(RegionLevel::Office, "140000").is_none());
        assert!(catalog.node(RegionLevel::FineArea, "130010").is_some());

        let index = catalog.build_index();
        assert_eq!(index[0].offices.len(), 1);
        assert_eq!(index[0].offices[0].areas.len(), 1);
    }

    #[test]
    fn test_missing_group_is_fatal() {
        let mut doc = sample_document();
        doc.as_object_mut().unwrap().remove("offices");
        let err = RegionCatalog::from_value(&doc).unwrap_err();
        assert!(matches!(err, ForecastError::CatalogLoad(ref m) if m.contains("offices")));

        let err = RegionCatalog::from_json("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ForecastError::CatalogLoad(_)));
    }

    #[test]
    fn test_first_declaring_office_owns_area() {
        let mut doc = sample_document();
        doc["offices"]["140000"]["children"] = serde_json::json!(["140010", "130010"]);
        let catalog = RegionCatalog::from_value(&doc).unwrap();
        assert_eq!(catalog.find_parent_office("130010"), "130000");
    }

    #[test]
    fn test_region_lookup_prefers_fine_area() {
        let catalog = sample_catalog();
        assert_eq!(catalog.region("130010").unwrap().name, "東京地方");
        assert_eq!(catalog.region("130000").unwrap().level, RegionLevel::Office);
        assert!(catalog.region("nope").is_none());
        assert_eq!(catalog.len(), 9);
    }

    #[tokio::test]
    async fn test_fetch_catalog() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/area.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_document()))
            .mount(&mock_server)
            .await;

        let url = format!("{}/area.json", mock_server.uri());
        let catalog = RegionCatalog::load(&reqwest::Client::new(), &CatalogSource::Url(url))
            .await
            .unwrap();
        assert_eq!(catalog.find_parent_office("016010"), "016000");
    }

    #[tokio::test]
    async fn test_fetch_catalog_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/area.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let url = format!("{}/area.json", mock_server.uri());
        let result = RegionCatalog::fetch(&reqwest::Client::new(), &url).await;
        assert!(matches!(result, Err(ForecastError::CatalogLoad(_))));
    }
}
