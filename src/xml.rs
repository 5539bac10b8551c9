// xml.rs from nusclient
//
// Schema-validated decoding of catalog XML responses (Samurai/Ninja/Tagaya).
// Grounded on original_source/nus_tools/types/samurai/{title_list,common,
// misc,demo,dlc}.py, nus_tools/types/ninja/all.py, and
// nus_tools/types/tagaya/all.py for tag/field shapes, and on
// `retro-junk-dat/src/dat.rs`'s quick-xml event-loop idiom for the reader.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

use crate::id::{ContentId, IdError, TitleId};
use crate::typeloader::{TypeLoadConfig, XmlLoadable};

#[derive(Debug, Error)]
pub enum XmlError {
    #[error(transparent)]
    QuickXml(#[from] quick_xml::Error),
    #[error("expected root tag `{expected}`, got `{actual}`")]
    WrongRootTag { expected: String, actual: String },
    #[error("missing required child `{tag}` under `{path}`")]
    MissingChild { tag: String, path: String },
    #[error("missing required attribute `{attr}` on `{tag}`")]
    MissingAttr { attr: String, tag: String },
    #[error("unexpected tag `{tag}` under `{path}`")]
    UnexpectedTag { tag: String, path: String },
    #[error("unexpected XML structure under `{path}`: expected {expected}, got {got}")]
    SchemaMismatch { path: String, expected: String, got: String },
    #[error("invalid boolean text `{0}`")]
    InvalidBool(String),
    #[error("invalid integer in `{0}`")]
    InvalidInt(String),
    #[error(transparent)]
    Id(#[from] IdError),
}

/// A generic, fully-materialized XML element tree, built once per document
/// so schema validation and record decoding can both walk it freely (unlike
/// a one-pass `quick_xml` event loop).
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    pub fn require_attr(&self, name: &str) -> Result<&str, XmlError> {
        self.attr(name).ok_or_else(|| XmlError::MissingAttr {
            attr: name.to_string(),
            tag: self.tag.clone(),
        })
    }

    pub fn child(&self, tag: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn require_child(&self, tag: &str) -> Result<&XmlElement, XmlError> {
        self.child(tag).ok_or_else(|| XmlError::MissingChild {
            tag: tag.to_string(),
            path: self.tag.clone(),
        })
    }

    pub fn children_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    pub fn text_of(&self, tag: &str) -> Result<String, XmlError> {
        Ok(self.require_child(tag)?.text.clone())
    }
}

/// Parses the whole byte buffer into a single root [`XmlElement`].
pub fn parse_document(data: &[u8]) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = HashMap::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value()?.into_owned();
                    attrs.insert(key, value);
                }
                stack.push(XmlElement { tag, attrs, text: String::new(), children: Vec::new() });
            }
            Event::Empty(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = HashMap::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value()?.into_owned();
                    attrs.insert(key, value);
                }
                let el = XmlElement { tag, attrs, text: String::new(), children: Vec::new() };
                push_or_finish(&mut stack, &mut root, el);
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape()?);
                }
            }
            Event::End(_) => {
                if let Some(el) = stack.pop() {
                    push_or_finish(&mut stack, &mut root, el);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| XmlError::MissingChild { tag: "<root>".to_string(), path: String::new() })
}

fn push_or_finish(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>, el: XmlElement) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
    } else {
        *root = Some(el);
    }
}

/// Parses the document and asserts its root tag, as every catalog endpoint's
/// response is wrapped in one well-known root element.
pub fn load_root(data: &[u8], expected_tag: &str) -> Result<XmlElement, XmlError> {
    let root = parse_document(data)?;
    if root.tag != expected_tag {
        return Err(XmlError::WrongRootTag {
            expected: expected_tag.to_string(),
            actual: root.tag,
        });
    }
    Ok(root)
}

/// A schema tree: each key maps to `None` (expect a leaf with no children)
/// or `Some` subtree. Mirrors the Python source's `get_tag_schema` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema(pub HashMap<String, Option<Schema>>);

impl Schema {
    pub fn leaf() -> Option<Schema> {
        None
    }

    pub fn branch(entries: impl IntoIterator<Item = (&'static str, Option<Schema>)>) -> Schema {
        Schema(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

fn actual_schema(el: &XmlElement) -> Schema {
    let mut map = HashMap::new();
    for child in &el.children {
        let sub = if child.children.is_empty() { None } else { Some(actual_schema(child)) };
        // last write wins for repeated tags, matching get_tag_schema's dict semantics
        map.insert(child.tag.clone(), sub);
    }
    Schema(map)
}

fn is_subset(a: &Schema, b: &Schema) -> bool {
    for (k, va) in &a.0 {
        match b.0.get(k) {
            None => return false,
            Some(vb) => match (va, vb) {
                (None, _) => {}
                (Some(sa), Some(sb)) => {
                    if !is_subset(sa, sb) {
                        return false;
                    }
                }
                (Some(_), None) => return false,
            },
        }
    }
    true
}

/// Enforces either exact-match (`superset=false`) or subset (`superset=true`,
/// actual tags must be contained in `target`) tag-tree semantics, per spec
/// §4.7: unknown tags fail unless the schema node allows a superset.
pub fn validate_schema(el: &XmlElement, target: &Schema, superset: bool) -> Result<(), XmlError> {
    let actual = actual_schema(el);
    if superset {
        if !is_subset(&actual, target) {
            let tag = first_unknown_tag(&actual, target).unwrap_or_else(|| el.tag.clone());
            return Err(XmlError::UnexpectedTag { tag, path: el.tag.clone() });
        }
    } else if actual != *target {
        return Err(XmlError::SchemaMismatch {
            path: el.tag.clone(),
            expected: format!("{:?}", target.0.keys().collect::<Vec<_>>()),
            got: format!("{:?}", actual.0.keys().collect::<Vec<_>>()),
        });
    }
    Ok(())
}

fn first_unknown_tag(a: &Schema, b: &Schema) -> Option<String> {
    for (k, va) in &a.0 {
        match b.0.get(k) {
            None => return Some(k.clone()),
            Some(vb) => {
                if let (Some(sa), Some(sb)) = (va, vb) {
                    if let Some(t) = first_unknown_tag(sa, sb) {
                        return Some(t);
                    }
                }
            }
        }
    }
    None
}

pub fn get_bool(text: &str) -> Result<bool, XmlError> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(XmlError::InvalidBool(text.to_string())),
    }
}

fn parse_int(s: &str) -> Result<i64, XmlError> {
    s.trim().parse().map_err(|_| XmlError::InvalidInt(s.to_string()))
}

// ---------------------------------------------------------------------------
// Shared value types (original_source/nus_tools/types/samurai/common.py)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IdName {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Icon {
    pub url: String,
    pub kind: String,
}

impl Icon {
    fn parse(el: &XmlElement) -> Result<Self, XmlError> {
        Ok(Icon { url: el.require_attr("url")?.to_string(), kind: el.require_attr("type")?.to_string() })
    }
}

#[derive(Debug, Clone)]
pub struct Rating {
    pub system: IdName,
    pub id: i64,
    pub icons: Vec<Icon>,
    pub name: String,
    pub age: String,
}

impl Rating {
    fn parse(el: &XmlElement) -> Result<Self, XmlError> {
        let rating_system = el.require_child("rating_system")?;
        let rating = el.require_child("rating")?;
        let icons = rating
            .require_child("icons")?
            .children_by_tag("icon")
            .map(Icon::parse)
            .collect::<Result<_, _>>()?;
        Ok(Rating {
            system: IdName {
                id: parse_int(rating_system.require_attr("id")?)?,
                name: rating_system.text_of("name")?,
            },
            id: parse_int(rating.require_attr("id")?)?,
            icons,
            name: rating.text_of("name")?,
            age: rating.text_of("age")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Platform {
    pub id: i64,
    pub device: String,
    pub category: String,
    pub name: String,
    pub icon_url: Option<String>,
}

impl Platform {
    fn parse(el: &XmlElement) -> Result<Self, XmlError> {
        Ok(Platform {
            id: parse_int(el.require_attr("id")?)?,
            device: el.require_attr("device")?.to_string(),
            category: el.require_attr("category")?.to_string(),
            name: el.text_of("name")?,
            icon_url: el.child("icon_url").map(|c| c.text.clone()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Stars {
    pub score: f64,
    pub total_votes: i64,
    /// `star1`..`star5` vote counts, indexed `1..=5`.
    pub stars: HashMap<u8, i64>,
}

impl Stars {
    fn parse(el: &XmlElement) -> Result<Self, XmlError> {
        let mut stars = HashMap::new();
        for i in 1..=5u8 {
            stars.insert(i, parse_int(&el.text_of(&format!("star{i}"))?)?);
        }
        Ok(Stars {
            score: el.text_of("score")?.trim().parse().map_err(|_| XmlError::InvalidInt("score".to_string()))?,
            total_votes: parse_int(&el.text_of("votes")?)?,
            stars,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Price {
    pub amount: Option<f64>,
    pub currency: String,
}

// ---------------------------------------------------------------------------
// Catalog records (original_source/nus_tools/types/samurai/title_list.py)
// ---------------------------------------------------------------------------

/// A single entry from a Samurai title-list response.
#[derive(Debug, Clone)]
pub struct TitleListEntry {
    pub is_new: bool,
    pub content_id: ContentId,
    pub product_code: String,
    pub name: String,
    pub platform: Platform,
    pub publisher: IdName,
    pub genre: String,
    pub sales_retail: bool,
    pub sales_eshop: bool,
    pub has_demo: bool,
    pub has_dlc_inaccurate: bool,
    pub has_iap_inaccurate: bool,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    pub rating: Option<Rating>,
    pub rating_stars: Option<Stars>,
    pub release_date_eshop: Option<String>,
    pub release_date_retail: Option<String>,
    pub price_retail: Option<Price>,
}

impl TitleListEntry {
    fn parse(el: &XmlElement) -> Result<Self, XmlError> {
        let is_new = get_bool(el.require_attr("new")?)?;
        let content_id = ContentId::from_str(el.require_attr("id")?)?;

        let publisher_el = el.require_child("publisher")?;
        let publisher = IdName {
            id: parse_int(publisher_el.require_attr("id")?)?,
            name: publisher_el.text_of("name")?,
        };

        let price_retail = el
            .child("price_on_retail_detail")
            .map(|p| -> Result<Price, XmlError> {
                let amount_text = p.text_of("amount")?;
                let amount = if amount_text.contains("TBD") {
                    None
                } else {
                    Some(p.text_of("raw_value")?.trim().parse().map_err(|_| {
                        XmlError::InvalidInt("price_on_retail_detail/raw_value".to_string())
                    })?)
                };
                Ok(Price { amount, currency: p.text_of("currency")? })
            })
            .transpose()?;

        Ok(TitleListEntry {
            is_new,
            content_id,
            product_code: el.text_of("product_code")?,
            name: el.text_of("name")?,
            platform: Platform::parse(el.require_child("platform")?)?,
            publisher,
            genre: el.text_of("display_genre")?,
            sales_retail: get_bool(&el.text_of("retail_sales")?)?,
            sales_eshop: get_bool(&el.text_of("eshop_sales")?)?,
            has_demo: get_bool(&el.text_of("demo_available")?)?,
            has_dlc_inaccurate: get_bool(&el.text_of("aoc_available")?)?,
            has_iap_inaccurate: get_bool(&el.text_of("in_app_purchase")?)?,
            icon_url: el.child("icon_url").map(|c| c.text.clone()),
            banner_url: el.child("banner_url").map(|c| c.text.clone()),
            rating: el.child("rating_info").map(Rating::parse).transpose()?,
            rating_stars: el.child("star_rating_info").map(Stars::parse).transpose()?,
            release_date_eshop: el.child("release_date_on_eshop").map(|c| c.text.clone()),
            release_date_retail: el.child("release_date_on_retail").map(|c| c.text.clone()),
            price_retail,
        })
    }
}

/// `SamuraiTitlesList`: a paginated batch of [`TitleListEntry`] records.
#[derive(Debug, Clone)]
pub struct TitleList {
    pub length: i64,
    pub offset: i64,
    pub total: i64,
    pub titles: Vec<TitleListEntry>,
}

impl XmlLoadable for TitleList {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        let length = parse_int(root.require_attr("length").map_err(xml_err)?).map_err(xml_err)?;
        let offset = parse_int(root.require_attr("offset").map_err(xml_err)?).map_err(xml_err)?;
        let total = parse_int(root.require_attr("total").map_err(xml_err)?).map_err(xml_err)?;

        let contents = root.require_child("contents").map_err(xml_err)?;
        let mut titles = Vec::new();
        for content in contents.children_by_tag("content") {
            let title = content.require_child("title").map_err(xml_err)?;
            titles.push(TitleListEntry::parse(title).map_err(xml_err)?);
        }
        Ok(TitleList { length, offset, total, titles })
    }
}

// ---------------------------------------------------------------------------
// News / telops (original_source/nus_tools/types/samurai/misc.py)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewsImage {
    pub url: String,
    pub kind: String,
    pub index: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone)]
pub struct NewsEntry {
    pub headline: String,
    pub description: String,
    pub date: String,
    pub images: Vec<NewsImage>,
}

#[derive(Debug, Clone)]
pub struct News {
    pub entries: Vec<NewsEntry>,
}

impl XmlLoadable for News {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        let mut entries = Vec::new();
        for entry in root.children_by_tag("news_entry") {
            let images = entry
                .child("images")
                .map(|imgs| {
                    imgs.children_by_tag("image")
                        .map(|image| {
                            Ok(NewsImage {
                                url: image.require_attr("url")?.to_string(),
                                kind: image.require_attr("type")?.to_string(),
                                index: parse_int(image.require_attr("index")?)?,
                                width: parse_int(image.require_attr("width")?)?,
                                height: parse_int(image.require_attr("height")?)?,
                            })
                        })
                        .collect::<Result<Vec<_>, XmlError>>()
                })
                .transpose()
                .map_err(xml_err)?
                .unwrap_or_default();
            entries.push(NewsEntry {
                headline: entry.text_of("headline").map_err(xml_err)?,
                description: entry.text_of("description").map_err(xml_err)?,
                date: entry.text_of("date").map_err(xml_err)?,
                images,
            });
        }
        Ok(News { entries })
    }
}

#[derive(Debug, Clone)]
pub struct Telops {
    pub entries: Vec<String>,
}

impl XmlLoadable for Telops {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        Ok(Telops { entries: root.children_by_tag("telop").map(|e| e.text.clone()).collect() })
    }
}

// ---------------------------------------------------------------------------
// Demo (original_source/nus_tools/types/samurai/demo.py)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Demo {
    pub name: String,
    pub rating: Option<Rating>,
    pub icon_url: Option<String>,
}

impl XmlLoadable for Demo {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        let demo = root.require_child("demo").map_err(xml_err)?;
        Ok(Demo {
            name: demo.text_of("name").map_err(xml_err)?,
            icon_url: demo.child("icon_url").map(|c| c.text.clone()),
            rating: demo.child("rating_info").map(Rating::parse).transpose().map_err(xml_err)?,
        })
    }
}

// ---------------------------------------------------------------------------
// DLC (original_source/nus_tools/types/samurai/dlc.py, WiiU subset)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DlcContentIndexes {
    pub variation: String,
    pub indexes: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct DlcEntry {
    pub is_new: bool,
    pub content_id: ContentId,
    pub name: String,
    pub icon_url: String,
    pub content_indexes: DlcContentIndexes,
    pub description: String,
    pub allow_overlap: bool,
}

impl DlcEntry {
    fn parse(el: &XmlElement) -> Result<Self, XmlError> {
        let content_indexes_el = el.require_child("content_indexes")?;
        let content_indexes = DlcContentIndexes {
            variation: content_indexes_el.require_attr("variation")?.to_string(),
            indexes: content_indexes_el
                .children_by_tag("content_index")
                .map(|c| parse_int(&c.text))
                .collect::<Result<_, _>>()?,
        };
        Ok(DlcEntry {
            is_new: get_bool(el.require_attr("new")?)?,
            content_id: ContentId::from_str(el.require_attr("id")?)?,
            name: el.text_of("name")?,
            icon_url: el.text_of("icon_url")?,
            content_indexes,
            description: el.text_of("description")?,
            allow_overlap: get_bool(&el.text_of("allow_overlap")?)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DlcList {
    pub entries: Vec<DlcEntry>,
}

impl XmlLoadable for DlcList {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        let entries = root.children_by_tag("aoc").map(DlcEntry::parse).collect::<Result<_, _>>().map_err(xml_err)?;
        Ok(DlcList { entries })
    }
}

// ---------------------------------------------------------------------------
// Ninja: id-pair, ec-info (original_source/nus_tools/types/ninja/all.py)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EcInfo {
    pub title_id: TitleId,
    pub content_size: i64,
    pub version: i64,
    pub download_disabled: bool,
}

impl XmlLoadable for EcInfo {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        Ok(EcInfo {
            title_id: TitleId::from_str(&root.text_of("title_id").map_err(xml_err)?).map_err(xml_err)?,
            content_size: parse_int(&root.text_of("content_size").map_err(xml_err)?).map_err(xml_err)?,
            version: parse_int(&root.text_of("title_version").map_err(xml_err)?).map_err(xml_err)?,
            download_disabled: get_bool(&root.text_of("disable_download").map_err(xml_err)?).map_err(xml_err)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IdPair {
    pub content_id: ContentId,
    pub title_id: TitleId,
}

impl XmlLoadable for IdPair {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        let pair = root.require_child("title_id_pair").map_err(xml_err)?;
        Ok(IdPair {
            content_id: ContentId::from_str(&pair.text_of("ns_uid").map_err(xml_err)?).map_err(xml_err)?,
            title_id: TitleId::from_str(&pair.text_of("title_id").map_err(xml_err)?).map_err(xml_err)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tagaya: update list (original_source/nus_tools/types/tagaya/all.py)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UpdateListVersion {
    pub latest: i64,
    pub fqdn: String,
}

impl XmlLoadable for UpdateListVersion {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        Ok(UpdateListVersion {
            latest: parse_int(&root.text_of("version").map_err(xml_err)?).map_err(xml_err)?,
            fqdn: root.text_of("fqdn").map_err(xml_err)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UpdateList {
    pub updates: Vec<(TitleId, i64)>,
}

impl XmlLoadable for UpdateList {
    fn from_xml_bytes(data: &[u8], _config: &TypeLoadConfig) -> Result<Self, crate::typeloader::TypeLoaderError> {
        let root = parse_document(data).map_err(xml_err)?;
        let updates = match root.child("titles") {
            Some(titles) => titles
                .children_by_tag("title")
                .map(|t| -> Result<(TitleId, i64), XmlError> {
                    Ok((TitleId::from_str(&t.text_of("id")?)?, parse_int(&t.text_of("version")?)?))
                })
                .collect::<Result<_, _>>()
                .map_err(xml_err)?,
            None => Vec::new(),
        };
        Ok(UpdateList { updates })
    }
}

fn xml_err(e: XmlError) -> crate::typeloader::TypeLoaderError {
    crate::typeloader::TypeLoaderError::Xml(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_telops() {
        let xml = b"<telops><telop>one</telop><telop>two</telop></telops>";
        let root = parse_document(xml).unwrap();
        assert_eq!(root.tag, "telops");
        let telops = Telops::from_xml_bytes(xml, &TypeLoadConfig::default()).unwrap();
        assert_eq!(telops.entries, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn schema_exact_match_rejects_extra_tag() {
        let xml = b"<telops><telop>one</telop><extra>x</extra></telops>";
        let root = parse_document(xml).unwrap();
        let target = Schema::branch([("telop", None)]);
        assert!(validate_schema(&root, &target, false).is_err());
    }

    #[test]
    fn schema_superset_allows_unmodeled_subtree_under_known_tag() {
        let xml = b"<title><name>x</name></title>";
        let root = parse_document(xml).unwrap();
        let target = Schema::branch([("name", None), ("icon_url", None)]);
        assert!(validate_schema(&root, &target, true).is_ok());
    }

    #[test]
    fn parses_id_pair() {
        let xml = b"<title_id_pairs><title_id_pair><ns_uid>20010000000001</ns_uid><title_id>0005000010143400</title_id><type>T</type></title_id_pair></title_id_pairs>";
        let pair = IdPair::from_xml_bytes(xml, &TypeLoadConfig::default()).unwrap();
        assert_eq!(pair.content_id.uid, 1);
    }
}
