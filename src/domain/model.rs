use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::detection::TrashClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelId {
    pub name: String,       // logical name, e.g. "yolov8n"
    pub onnx_path: String,  // filesystem path
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub input_size: u32,             // 640 typical
    pub confidence_threshold: f32,   // 0..1
    pub iou_threshold: f32,          // 0..1
    pub max_detections: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// Ingestion and viewer cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingParams {
    pub fps: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
    pub viewer_poll_ms: u64,
    pub read_retry_ms: u64,
    pub reconnect_max_backoff_ms: u64,
}

impl Default for StreamingParams {
    fn default() -> Self {
        Self {
            fps: 10,
            max_width: 1280,
            max_height: 720,
            jpeg_quality: 85,
            viewer_poll_ms: 33,
            read_retry_ms: 100,
            reconnect_max_backoff_ms: 5_000,
        }
    }
}

impl StreamingParams {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    pub fn viewer_poll(&self) -> Duration {
        Duration::from_millis(self.viewer_poll_ms.max(1))
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms.max(1))
    }

    pub fn reconnect_max_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_backoff_ms.max(self.read_retry_ms).max(1))
    }
}

/// One row of the class table: how labels map to a trash class and how it is drawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRule {
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub color: [u8; 3],
    #[serde(default = "white")]
    pub text_color: [u8; 3],
}

impl ClassRule {
    fn matches(&self, label: &str) -> bool {
        self.keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && label.contains(&k))
    }
}

fn white() -> [u8; 3] {
    [255, 255, 255]
}

fn default_container() -> ClassRule {
    ClassRule {
        label: "Trash Bin".into(),
        keywords: ["trash can", "trash bin", "garbage bin", "dustbin", "waste bin", "container"]
            .map(String::from)
            .to_vec(),
        color: [0, 200, 0],
        text_color: white(),
    }
}

fn default_scattered() -> ClassRule {
    ClassRule {
        label: "Scattered Trash".into(),
        keywords: ["trash", "litter", "garbage", "waste", "plastic bag", "wrapper"]
            .map(String::from)
            .to_vec(),
        color: [255, 140, 0],
        text_color: white(),
    }
}

fn default_overload() -> ClassRule {
    ClassRule {
        label: "OVERLOAD DETECTED".into(),
        keywords: Vec::new(),
        color: [220, 0, 0],
        text_color: white(),
    }
}

fn default_trash_items() -> Vec<String> {
    [
        "bottle", "cup", "bowl", "fork", "knife", "spoon", "banana", "apple", "sandwich",
        "orange", "carrot",
    ]
    .map(String::from)
    .to_vec()
}

/// Maps detector labels onto trash classes. Container keywords win over scattered ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassTable {
    #[serde(default = "default_container")]
    pub container: ClassRule,
    #[serde(default = "default_scattered")]
    pub scattered_trash: ClassRule,
    #[serde(default = "default_overload")]
    pub overload: ClassRule,
    /// Exact (case-insensitive) labels counted as scattered trash.
    #[serde(default = "default_trash_items")]
    pub trash_items: Vec<String>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self {
            container: default_container(),
            scattered_trash: default_scattered(),
            overload: default_overload(),
            trash_items: default_trash_items(),
        }
    }
}

impl ClassTable {
    pub fn classify(&self, label: &str) -> Option<TrashClass> {
        let label = label.trim().to_lowercase();
        if self.container.matches(&label) {
            return Some(TrashClass::Container);
        }
        if self.scattered_trash.matches(&label)
            || self.trash_items.iter().any(|item| item.eq_ignore_ascii_case(&label))
        {
            return Some(TrashClass::ScatteredTrash);
        }
        None
    }

    pub fn rule(&self, class: TrashClass) -> &ClassRule {
        match class {
            TrashClass::Container => &self.container,
            TrashClass::ScatteredTrash => &self.scattered_trash,
            TrashClass::Overload => &self.overload,
        }
    }
}
