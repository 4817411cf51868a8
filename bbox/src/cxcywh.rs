use super::{Rect, XYXY};
use crate::common::*;

/// Bounding box in center `(cx, cy, w, h)` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CxCyWH<T> {
    pub(crate) cx: T,
    pub(crate) cy: T,
    pub(crate) w: T,
    pub(crate) h: T,
}

impl<T> CxCyWH<T> {
    pub fn try_cast<V>(self) -> Option<CxCyWH<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(CxCyWH {
            cx: V::from(self.cx)?,
            cy: V::from(self.cy)?,
            w: V::from(self.w)?,
            h: V::from(self.h)?,
        })
    }

    pub fn cast<V>(self) -> CxCyWH<V>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        self.try_cast().unwrap()
    }
}

impl<T> CxCyWH<T>
where
    T: Copy + Num + PartialOrd,
{
    /// Grow or shrink the box about its center.
    pub fn try_scale(&self, scale: T) -> Result<Self> {
        let zero = T::zero();
        ensure!(scale > zero, "scaling factor must be positive");

        let Self { cx, cy, w, h, .. } = *self;
        let w = w * scale;
        let h = h * scale;
        Ok(Self { cx, cy, w, h })
    }

    pub fn scale(&self, scale: T) -> Self {
        self.try_scale(scale).unwrap()
    }
}

impl<T> Rect for CxCyWH<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn x_min(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx - self.w / two
    }

    fn y_min(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy - self.h / two
    }

    fn x_max(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx + self.w / two
    }

    fn y_max(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy + self.h / two
    }

    fn cx(&self) -> Self::Type {
        self.cx
    }

    fn cy(&self) -> Self::Type {
        self.cy
    }

    fn w(&self) -> Self::Type {
        self.w
    }

    fn h(&self) -> Self::Type {
        self.h
    }

    fn try_from_xyxy(xyxy: [T; 4]) -> Result<Self> {
        let [x_min, y_min, x_max, y_max] = xyxy;
        let zero = T::zero();
        let two = T::one() + T::one();
        let w = x_max - x_min;
        let h = y_max - y_min;
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        let cx = x_min + w / two;
        let cy = y_min + h / two;
        Ok(Self { cx, cy, w, h })
    }

    fn try_from_xywh(xywh: [T; 4]) -> Result<Self> {
        let [x, y, w, h] = xywh;
        let zero = T::zero();
        let two = T::one() + T::one();
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        let cx = x + w / two;
        let cy = y + h / two;
        Ok(Self { cx, cy, w, h })
    }

    fn try_from_cxcywh(cxcywh: [T; 4]) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let zero = T::zero();
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        Ok(Self { cx, cy, w, h })
    }
}

impl<T> From<XYXY<T>> for CxCyWH<T>
where
    T: Copy + Num,
{
    fn from(from: XYXY<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&XYXY<T>> for CxCyWH<T>
where
    T: Copy + Num,
{
    fn from(from: &XYXY<T>) -> Self {
        let two = T::one() + T::one();
        let XYXY {
            x_min,
            y_min,
            x_max,
            y_max,
            ..
        } = *from;
        let w = x_max - x_min;
        let h = y_max - y_min;
        let cx = x_min + w / two;
        let cy = y_min + h / two;
        Self { cx, cy, w, h }
    }
}
