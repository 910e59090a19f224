use crate::BBox;

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let ix_a = a.x1.max(b.x1);
    let iy_a = a.y1.max(b.y1);
    let ix_b = a.x2.min(b.x2);
    let iy_b = a.y2.min(b.y2);

    let iw = (ix_b - ix_a).max(0.0);
    let ih = (iy_b - iy_a).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_boxes() {
        let b = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(iou(&b, &b), 1.0);
    }

    #[test]
    fn half_shifted() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        // 50 / 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_and_degenerate() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(iou(&a, &BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        let z = BBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(iou(&z, &z), 0.0);
    }
}
