use super::{CxCyWH, Rect};
use crate::common::*;

/// Bounding box in corner `(x_min, y_min, x_max, y_max)` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XYXY<T> {
    pub(crate) x_min: T,
    pub(crate) y_min: T,
    pub(crate) x_max: T,
    pub(crate) y_max: T,
}

impl<T> XYXY<T> {
    pub fn try_cast<V>(self) -> Option<XYXY<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(XYXY {
            x_min: V::from(self.x_min)?,
            y_min: V::from(self.y_min)?,
            x_max: V::from(self.x_max)?,
            y_max: V::from(self.y_max)?,
        })
    }

    pub fn cast<V>(self) -> XYXY<V>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        self.try_cast().unwrap()
    }
}

impl<T> Rect for XYXY<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn x_min(&self) -> Self::Type {
        self.x_min
    }

    fn y_min(&self) -> Self::Type {
        self.y_min
    }

    fn x_max(&self) -> Self::Type {
        self.x_max
    }

    fn y_max(&self) -> Self::Type {
        self.y_max
    }

    fn cx(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.x_min + self.w() / two
    }

    fn cy(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.y_min + self.h() / two
    }

    fn w(&self) -> Self::Type {
        self.x_max - self.x_min
    }

    fn h(&self) -> Self::Type {
        self.y_max - self.y_min
    }

    fn try_from_xyxy(xyxy: [T; 4]) -> Result<Self> {
        let [x_min, y_min, x_max, y_max] = xyxy;
        ensure!(
            x_max >= x_min && y_max >= y_min,
            "x_max >= x_min and y_max >= y_min must hold"
        );

        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    fn try_from_xywh(xywh: [T; 4]) -> Result<Self> {
        let [x, y, w, h] = xywh;
        let x_max = x + w;
        let y_max = y + h;
        Self::try_from_xyxy([x, y, x_max, y_max])
    }

    fn try_from_cxcywh(cxcywh: [T; 4]) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let zero = T::zero();
        ensure!(h >= zero && w >= zero, "h and w must be non-negative");

        let two = T::one() + T::one();
        let x_min = cx - w / two;
        let x_max = cx + w / two;
        let y_min = cy - h / two;
        let y_max = cy + h / two;

        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }
}

impl<T> From<CxCyWH<T>> for XYXY<T>
where
    T: Copy + Num,
{
    fn from(from: CxCyWH<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&CxCyWH<T>> for XYXY<T>
where
    T: Copy + Num,
{
    fn from(from: &CxCyWH<T>) -> Self {
        let two = T::one() + T::one();
        let CxCyWH { cx, cy, w, h, .. } = *from;
        let x_min = cx - w / two;
        let y_min = cy - h / two;
        let x_max = cx + w / two;
        let y_max = cy + h / two;
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }
}
