//! Display surface and the animal display update.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::vocabulary::{ImageResources, Vocabulary, normalize};

/// The UI-bound fields the application writes to.
///
/// Only the recognition loop task mutates a surface, so implementations need
/// no synchronization of their own.
pub trait DisplaySurface {
    /// Replace the currently displayed image.
    fn set_image_source(&mut self, source: &Path);

    /// Replace the label text.
    fn set_label(&mut self, text: &str);

    /// Show a one-shot informational notice to the user.
    fn show_notice(&mut self, message: &str);
}

/// Show the animal matching `text`.
///
/// The label is always set to the normalized text. The image only changes
/// when the normalized text is a vocabulary name, so an unknown word leaves
/// the previous image on screen.
///
/// # Returns
/// The normalized label.
pub fn show_animal<D: DisplaySurface + ?Sized>(vocabulary: &Vocabulary, resources: &ImageResources, surface: &mut D, text: &str) -> String {
    let label = normalize(text);

    if vocabulary.contains(&label) {
        surface.set_image_source(&resources.image_for(&label));
    }
    surface.set_label(&label);

    label
}

/// Terminal rendition of the display: keeps the two fields and logs changes.
#[derive(Debug, Default)]
pub struct TerminalDisplay {
    image_source: Option<PathBuf>, // Currently displayed image
    label: String,                 // Currently displayed name
}

impl TerminalDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_source(&self) -> Option<&Path> {
        self.image_source.as_deref()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl DisplaySurface for TerminalDisplay {
    fn set_image_source(&mut self, source: &Path) {
        if !source.exists() {
            warn!("Image resource not found: {}", source.display());
        }
        info!("🖼️  Image: {}", source.display());
        self.image_source = Some(source.to_path_buf());
    }

    fn set_label(&mut self, text: &str) {
        info!("🐾 {}", text);
        self.label = text.to_string();
    }

    fn show_notice(&mut self, message: &str) {
        warn!("⚠️  {}", message);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Surface that records every write.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingDisplay {
        pub image_source: Option<PathBuf>,
        pub label: Option<String>,
        pub notices: Vec<String>,
        pub updates: usize,
    }

    impl DisplaySurface for RecordingDisplay {
        fn set_image_source(&mut self, source: &Path) {
            self.image_source = Some(source.to_path_buf());
        }

        fn set_label(&mut self, text: &str) {
            self.label = Some(text.to_string());
            self.updates += 1;
        }

        fn show_notice(&mut self, message: &str) {
            self.notices.push(message.to_string());
        }
    }

    fn resources() -> ImageResources {
        ImageResources::new("assets")
    }

    #[test]
    fn test_known_animal_sets_image_and_label() {
        let mut display = RecordingDisplay::default();
        let label = show_animal(&Vocabulary::standard(), &resources(), &mut display, "Fox.");

        assert_eq!(label, "fox");
        assert_eq!(display.label.as_deref(), Some("fox"));
        assert_eq!(display.image_source, Some(PathBuf::from("assets/Images/Animals/fox.jpg")));
    }

    #[test]
    fn test_unknown_word_keeps_previous_image() {
        let mut display = RecordingDisplay::default();
        let vocabulary = Vocabulary::standard();
        show_animal(&vocabulary, &resources(), &mut display, "owl");
        show_animal(&vocabulary, &resources(), &mut display, "Dragon");

        assert_eq!(display.label.as_deref(), Some("dragon"));
        assert_eq!(display.image_source, Some(PathBuf::from("assets/Images/Animals/owl.jpg")));
    }

    #[test]
    fn test_every_vocabulary_name_selects_its_own_image() {
        let vocabulary = Vocabulary::standard();
        for name in vocabulary.iter() {
            let mut display = RecordingDisplay::default();
            show_animal(&vocabulary, &resources(), &mut display, name);
            assert_eq!(display.image_source, Some(resources().image_for(name)));
            assert_eq!(display.label.as_deref(), Some(name));
        }
    }

    #[test]
    fn test_arbitrary_input_never_panics() {
        let mut display = RecordingDisplay::default();
        let vocabulary = Vocabulary::standard();
        for input in ["", ".", "   ", "🦊", "GUINEA PIG.", "a\nb", "\u{0130}stanbul", "x".repeat(4096).as_str()] {
            let label = show_animal(&vocabulary, &resources(), &mut display, input);
            assert_eq!(display.label.as_deref(), Some(normalize(input).as_str()));
            assert_eq!(label, normalize(input));
        }
        assert!(display.image_source.as_ref().is_some_and(|p| p.ends_with("guinea pig.jpg")));
    }

    #[test]
    fn test_terminal_display_tracks_fields() {
        let mut display = TerminalDisplay::new();
        show_animal(&Vocabulary::standard(), &resources(), &mut display, "Cat");
        assert_eq!(display.label(), "cat");
        assert_eq!(display.image_source(), Some(Path::new("assets/Images/Animals/cat.jpg")));
    }

    #[test]
    fn test_terminal_notice_leaves_fields_untouched() {
        let mut display = TerminalDisplay::new();
        display.show_notice("No Audio Capture devices are present on this system.");
        assert_eq!(display.label(), "");
        assert_eq!(display.image_source(), None);
    }
}
