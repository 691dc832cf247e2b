use serde::{Deserialize, Serialize};

/// More mapped detections than this are needed before a frame can be flagged as overloaded.
pub const OVERLOAD_MIN_DETECTIONS: usize = 3;
/// The "heap top" band is the top `NUM/DEN` of the frame height. A box whose top
/// edge sits exactly on the band's lower edge is outside it.
pub const OVERLOAD_TOP_BAND_NUM: u32 = 3;
pub const OVERLOAD_TOP_BAND_DEN: u32 = 10;
/// More detections than this must start inside the top band.
pub const OVERLOAD_MIN_TOP_HITS: usize = 1;

/// Raw detector output in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
    pub label: String,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrashClass {
    Container,
    ScatteredTrash,
    /// Frame-level indicator; never produced by classifying a single label.
    Overload,
}

impl TrashClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TrashClass::Container => "container",
            TrashClass::ScatteredTrash => "scattered_trash",
            TrashClass::Overload => "overload",
        }
    }
}

/// A detection that matched the class table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedDetection {
    #[serde(flatten)]
    pub detection: Detection,
    pub class: TrashClass,
}

/// Overload heuristic: a pile of mapped detections with several of them starting near the top.
pub fn is_overloaded(detections: &[ClassifiedDetection], frame_height: u32) -> bool {
    if detections.len() <= OVERLOAD_MIN_DETECTIONS {
        return false;
    }
    // cross-multiplied so 30% of 100 is exactly 30, not 30.000002
    let band = f64::from(frame_height) * f64::from(OVERLOAD_TOP_BAND_NUM);
    let top_hits = detections
        .iter()
        .filter(|d| f64::from(d.detection.y1) * f64::from(OVERLOAD_TOP_BAND_DEN) < band)
        .count();
    top_hits > OVERLOAD_MIN_TOP_HITS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(y1: f32) -> ClassifiedDetection {
        ClassifiedDetection {
            detection: Detection {
                x1: 10.0,
                y1,
                x2: 60.0,
                y2: y1 + 40.0,
                score: 0.8,
                class_id: 39,
                label: "bottle".into(),
            },
            class: TrashClass::ScatteredTrash,
        }
    }

    #[test]
    fn four_detections_with_two_near_top_is_overload() {
        // 100px frame: top band ends at y = 30
        let dets = vec![mapped(5.0), mapped(20.0), mapped(50.0), mapped(70.0)];
        assert!(is_overloaded(&dets, 100));
    }

    #[test]
    fn single_top_hit_is_not_enough() {
        let dets = vec![mapped(5.0), mapped(40.0), mapped(50.0), mapped(70.0)];
        assert!(!is_overloaded(&dets, 100));
    }

    #[test]
    fn three_or_fewer_never_overload() {
        let dets = vec![mapped(0.0), mapped(1.0), mapped(2.0)];
        assert!(!is_overloaded(&dets, 100));
        assert!(!is_overloaded(&dets[..1], 100));
        assert!(!is_overloaded(&[], 100));
    }

    #[test]
    fn band_edge_is_exclusive() {
        let dets = vec![mapped(30.0), mapped(30.0), mapped(50.0), mapped(70.0)];
        assert!(!is_overloaded(&dets, 100));
        // 30% of 720 is 216
        let dets = vec![mapped(216.0), mapped(216.0), mapped(300.0), mapped(400.0)];
        assert!(!is_overloaded(&dets, 720));
    }

    #[test]
    fn just_inside_the_band_counts() {
        let dets = vec![mapped(29.9), mapped(29.99), mapped(50.0), mapped(70.0)];
        assert!(is_overloaded(&dets, 100));
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = mapped(0.0).detection;
        let mut b = a.clone();
        assert!((a.iou(&b) - 1.0).abs() < 1e-6);
        b.x1 += 500.0;
        b.x2 += 500.0;
        assert_eq!(a.iou(&b), 0.0);
    }
}
