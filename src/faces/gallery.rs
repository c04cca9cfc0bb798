use crate::db::KnownFace;

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub name: String,
    pub encoding: Vec<f32>,
}

/// Ordered in-memory set of reference encodings used for matching.
///
/// Order matters: when two entries are equally close to a query the
/// earlier one wins.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_known_faces(faces: Vec<KnownFace>) -> Self {
        Self {
            entries: faces
                .into_iter()
                .map(|f| GalleryEntry {
                    name: f.name,
                    encoding: f.encoding,
                })
                .collect(),
        }
    }

    /// Swap in a whole new set of entries
    pub fn replace(&mut self, entries: Vec<GalleryEntry>) {
        self.entries = entries;
    }

    pub fn replace_from_known_faces(&mut self, faces: Vec<KnownFace>) {
        *self = Self::from_known_faces(faces);
    }

    pub fn push(&mut self, name: impl Into<String>, encoding: Vec<f32>) {
        self.entries.push(GalleryEntry {
            name: name.into(),
            encoding,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// Distinct names in gallery order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !names.contains(&entry.name.as_str()) {
                names.push(&entry.name);
            }
        }
        names
    }
}
