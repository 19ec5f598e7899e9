//! The closed animal vocabulary and its image resources.
//!
//! The same list is used as the recognizer constraint and as the lookup
//! table for display names.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::stt::ListConstraint;

/// Tag of the list constraint built from the vocabulary.
pub const CONSTRAINT_TAG: &str = "Animals";

/// Resource namespace under the assets root holding one image per animal.
const IMAGE_NAMESPACE: [&str; 2] = ["Images", "Animals"];

/// Every animal the application can recognize, in display order.
const ANIMALS: &[&str] = &[
    "aardvark", "badger", "dolphin", "duck", "fox", "guinea pig", "hamster", "kangaroo", "meerkat", "mouse", "owl", "panda", "pig",
    "monkey", "elephant", "rhino", "giraffe", "penguin", "lion", "tiger", "snake", "fish", "dog", "cat", "rabbit", "bear", "frog",
    "lizard", "tortoise", "cow", "goat", "hippo", "horse", "sheep", "zebra", "donkey", "bird", "whale",
];

/// Ordered set of recognizable names.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    names: Vec<String>,
    index: HashSet<String>,
}

impl Vocabulary {
    /// The built-in animal list.
    pub fn standard() -> Self {
        Self::from_names(ANIMALS.iter().copied())
    }

    /// Build a vocabulary from arbitrary names.
    ///
    /// Names are normalized the same way recognized text is, empty names are
    /// skipped and repeats keep their first position.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ordered = Vec::new();
        let mut index = HashSet::new();

        for name in names {
            let name = normalize(name.as_ref());
            if name.is_empty() {
                continue;
            }
            if index.insert(name.clone()) {
                ordered.push(name);
            }
        }

        Self { names: ordered, index }
    }

    /// Whether `name` (already normalized) is part of the vocabulary.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Build the recognizer list constraint for this vocabulary.
    pub fn to_constraint(&self) -> ListConstraint {
        ListConstraint::new(self.names.clone(), CONSTRAINT_TAG)
    }
}

/// Normalize recognized text for lookup.
///
/// Lowercases, removes every `.` and trims surrounding whitespace. Applying it
/// twice gives the same result as applying it once.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().replace('.', "").trim().to_string()
}

/// Locates the image resource of each animal under an assets root.
#[derive(Debug, Clone)]
pub struct ImageResources {
    root: PathBuf,
}

impl ImageResources {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self { root: assets_dir.into() }
    }

    /// Directory holding the animal images (`<root>/Images/Animals`).
    pub fn directory(&self) -> PathBuf {
        IMAGE_NAMESPACE.iter().fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Resource locator for a vocabulary name: `<root>/Images/Animals/<name>.jpg`.
    pub fn image_for(&self, name: &str) -> PathBuf {
        self.directory().join(format!("{name}.jpg"))
    }

    /// Names of the vocabulary whose image file does not exist.
    pub fn missing<'a>(&self, vocabulary: &'a Vocabulary) -> Vec<&'a str> {
        vocabulary.iter().filter(|name| !self.image_for(name).exists()).collect()
    }
}

/// Print the vocabulary with the image each name resolves to.
pub fn print_animals(vocabulary: &Vocabulary, resources: &ImageResources) {
    if vocabulary.is_empty() {
        println!("No animals configured.");
        return;
    }

    println!("═══════════════════════════════════════════════════════════════════");
    println!("  {} recognizable animals", vocabulary.len());
    println!("═══════════════════════════════════════════════════════════════════");
    println!();
    println!("{:<15} IMAGE", "NAME");
    println!("{}", "─".repeat(70));

    for name in vocabulary.iter() {
        let image = resources.image_for(name);
        let marker = if image.exists() { "" } else { "  (missing)" };
        println!("{:<15} {}{}", name, image.display(), marker);
    }

    println!();
    println!("Say any of these names while the recognizer is listening.");
}
