use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn to_array(self) -> [i32; 2] {
        [self.width, self.height]
    }

    pub fn from_array(value: [i32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn to_array(self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    pub fn from_array(value: [i32; 4]) -> Self {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    Code,
    Image,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Image => "image",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageMime {
    Png,
    Gif,
}

impl ImageMime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Gif => "GIF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn clockwise(self) -> Self {
        match self {
            Self::Deg0 => Self::Deg90,
            Self::Deg90 => Self::Deg180,
            Self::Deg180 => Self::Deg270,
            Self::Deg270 => Self::Deg0,
        }
    }

    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(format!("unsupported rotation {other}; expected 0|90|180|270")),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

/// String-keyed map that keeps entries in document order.
///
/// Order matters in notebook files: item order is z-order and section/page
/// order is tab order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: V) {
        self.0.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<V> IntoIterator for OrderedMap<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(key, value)| (key, value)))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map keyed by child id")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(OrderedMap::new())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries: Vec<(String, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((MapKey(key), value)) = access.next_entry::<MapKey, V>()? {
            if entries.iter().any(|(existing, _)| existing == &key) {
                return Err(de::Error::custom(format!("duplicate id `{key}`")));
            }
            entries.push((key, value));
        }
        Ok(OrderedMap(entries))
    }
}

// Hand-edited files may leave ids such as `1` unquoted.
struct MapKey(String);

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = MapKey;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a scalar id")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<MapKey, E> {
                Ok(MapKey(value.to_string()))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<MapKey, E> {
                Ok(MapKey(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<MapKey, E> {
                Ok(MapKey(value.to_string()))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<MapKey, E> {
                Ok(MapKey(value.to_string()))
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> Result<MapKey, E> {
                Ok(MapKey(value.to_string()))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookFile {
    pub id: String,
    #[serde(default)]
    pub sections: OrderedMap<SectionFile>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SectionFile {
    #[serde(default)]
    pub pages: OrderedMap<PageFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFile {
    pub geometry: [i32; 2],
    #[serde(default)]
    pub items: OrderedMap<ItemFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFile {
    pub geometry: [i32; 4],
    pub contents: ContentsFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentsFile {
    Text {
        #[serde(default)]
        value: String,
    },
    Code {
        #[serde(default)]
        value: String,
    },
    Image {
        url: String,
        asset_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<TransformFile>,
    },
}

impl ContentsFile {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Text { .. } => ItemKind::Text,
            Self::Code { .. } => ItemKind::Code,
            Self::Image { .. } => ItemKind::Image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformFile {
    #[serde(default)]
    pub rotation: Rotation,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
id: N1
sections:
  section-A:
    pages:
      1:
        geometry: [1000, 800]
        items:
          Text Box:
            geometry: [10, 10, 400, 100]
            contents:
              type: text
              value: Hello
          Image:
            geometry: [0, 0, 200, 150]
            contents:
              type: image
              url: file:asset-1.fna
              asset_name: asset-1
              transform: {rotation: 90}
"#;

    #[test]
    fn parses_notebook_file_preserving_order() {
        let parsed: NotebookFile = serde_yaml::from_str(SAMPLE).expect("sample parses");
        assert_eq!(parsed.id, "N1");
        let section = parsed.sections.get("section-A").expect("section present");
        let page = section.pages.get("1").expect("unquoted page id accepted");
        assert_eq!(page.geometry, [1000, 800]);
        assert_eq!(page.items.keys().collect::<Vec<_>>(), vec!["Text Box", "Image"]);

        let image = page.items.get("Image").expect("image item");
        match &image.contents {
            ContentsFile::Image {
                asset_name,
                transform,
                ..
            } => {
                assert_eq!(asset_name, "asset-1");
                assert_eq!(transform.map(|value| value.rotation), Some(Rotation::Deg90));
            }
            other => panic!("unexpected contents {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let raw = "id: N\nsections:\n  a: {}\n  a: {}\n";
        let error = serde_yaml::from_str::<NotebookFile>(raw).expect_err("duplicate section ids");
        assert!(error.to_string().contains("duplicate"));
    }

    #[test]
    fn rotation_rejects_odd_angles() {
        let raw = "rotation: 45\n";
        assert!(serde_yaml::from_str::<TransformFile>(raw).is_err());
    }

    #[test]
    fn text_contents_omit_image_fields() {
        let rendered = serde_yaml::to_string(&ContentsFile::Code {
            value: "fn main() {}".to_string(),
        })
        .expect("serialize");
        assert!(rendered.contains("type: code"));
        assert!(!rendered.contains("asset_name"));
    }

    #[test]
    fn rect_edges_are_exclusive() {
        let rect = Rect::new(10, 20, 400, 100);
        assert_eq!(rect.right(), 410);
        assert_eq!(rect.bottom(), 120);
        assert_eq!(Rect::from_array(rect.to_array()), rect);
    }
}
