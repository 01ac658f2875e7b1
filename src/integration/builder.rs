//! Builder for model output rows in the box layouts backends emit.

use super::detector::{ClassTag, RawDetection};

/// Builds a [`RawDetection`] from whichever box layout a model produces.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class: ClassTag,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corner pair (x1, y1, x2, y2).
    pub fn ltrb(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
        self
    }

    /// Center, width and height; the YOLO head layout.
    pub fn xywh(self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.ltrb(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Left, top, width and height.
    pub fn ltwh(self, l: f32, t: f32, w: f32, h: f32) -> Self {
        self.ltrb(l, t, l + w, t + h)
    }

    /// Undo letterboxing: subtract the padding, then divide by the resize scale.
    pub fn unletterbox(mut self, scale: f32, pad_x: f32, pad_y: f32) -> Self {
        self.x1 = (self.x1 - pad_x) / scale;
        self.y1 = (self.y1 - pad_y) / scale;
        self.x2 = (self.x2 - pad_x) / scale;
        self.y2 = (self.y2 - pad_y) / scale;
        self
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn class_index(mut self, index: usize) -> Self {
        self.class = ClassTag::Index(index);
        self
    }

    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class = ClassTag::Name(name.into());
        self
    }

    pub fn build(self) -> RawDetection {
        RawDetection::new([self.x1, self.y1, self.x2, self.y2], self.score, self.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_produce_same_corners() {
        let a = DetectionBuilder::new().ltrb(10.0, 20.0, 50.0, 80.0).score(0.95).class_index(2).build();
        let b = DetectionBuilder::new().xywh(30.0, 50.0, 40.0, 60.0).score(0.95).class_index(2).build();
        let c = DetectionBuilder::new().ltwh(10.0, 20.0, 40.0, 60.0).score(0.95).class_index(2).build();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.class, ClassTag::Index(2));
    }

    #[test]
    fn unletterbox_maps_back_to_source_pixels() {
        let det = DetectionBuilder::new()
            .ltrb(20.0, 100.0, 120.0, 300.0)
            .unletterbox(0.5, 20.0, 80.0)
            .class_name("truck")
            .build();
        assert_eq!(det.bbox, [0.0, 40.0, 200.0, 440.0]);
        assert_eq!(det.class, ClassTag::Name("truck".into()));
        assert_eq!(det.score, 0.0);
    }
}
