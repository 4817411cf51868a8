use super::{CxCyWH, HW, XYXY};
use crate::common::*;

/// The generic rectangle.
///
/// Corner coordinates follow the `(x_min, y_min, x_max, y_max)` order used
/// throughout the crate.
pub trait Rect {
    type Type;

    fn x_min(&self) -> Self::Type;
    fn y_min(&self) -> Self::Type;
    fn x_max(&self) -> Self::Type;
    fn y_max(&self) -> Self::Type;
    fn cx(&self) -> Self::Type;
    fn cy(&self) -> Self::Type;
    fn w(&self) -> Self::Type;
    fn h(&self) -> Self::Type;

    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_xywh(xywh: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;

    fn try_from_cxcywh(cxcywh: [Self::Type; 4]) -> Result<Self>
    where
        Self: Sized;
}

pub trait RectNum: Rect
where
    Self::Type: Num + PartialOrd + Copy,
{
    fn from_xyxy(xyxy: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_xyxy(xyxy).unwrap()
    }

    fn from_xywh(xywh: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_xywh(xywh).unwrap()
    }

    fn from_cxcywh(cxcywh: [Self::Type; 4]) -> Self
    where
        Self: Sized,
    {
        Self::try_from_cxcywh(cxcywh).unwrap()
    }

    fn xyxy(&self) -> [Self::Type; 4] {
        [self.x_min(), self.y_min(), self.x_max(), self.y_max()]
    }

    fn cxcywh(&self) -> [Self::Type; 4] {
        [self.cx(), self.cy(), self.w(), self.h()]
    }

    fn to_xyxy(&self) -> XYXY<Self::Type> {
        XYXY {
            x_min: self.x_min(),
            y_min: self.y_min(),
            x_max: self.x_max(),
            y_max: self.y_max(),
        }
    }

    fn to_cxcywh(&self) -> CxCyWH<Self::Type> {
        CxCyWH {
            cx: self.cx(),
            cy: self.cy(),
            w: self.w(),
            h: self.h(),
        }
    }

    fn area(&self) -> Self::Type {
        self.w() * self.h()
    }

    /// Width when corners denote an inclusive pixel range.
    fn pixel_w(&self) -> Self::Type {
        self.w() + Self::Type::one()
    }

    /// Height when corners denote an inclusive pixel range.
    fn pixel_h(&self) -> Self::Type {
        self.h() + Self::Type::one()
    }

    fn pixel_area(&self) -> Self::Type {
        self.pixel_w() * self.pixel_h()
    }
}

pub trait RectFloat: RectNum
where
    Self::Type: Float,
{
    fn intersect_with<R>(&self, other: &R) -> Option<XYXY<Self::Type>>
    where
        R: Rect<Type = Self::Type>,
    {
        let x_min = self.x_min().max(other.x_min());
        let y_min = self.y_min().max(other.y_min());
        let x_max = self.x_max().min(other.x_max());
        let y_max = self.y_max().min(other.y_max());
        (x_max >= x_min && y_max >= y_min).then(|| XYXY {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    /// Intersection area under the inclusive pixel-range convention.
    fn pixel_intersection_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type>,
    {
        let zero = Self::Type::zero();
        let one = Self::Type::one();
        let iw = (self.x_max().min(other.x_max()) - self.x_min().max(other.x_min()) + one).max(zero);
        let ih = (self.y_max().min(other.y_max()) - self.y_min().max(other.y_min()) + one).max(zero);
        iw * ih
    }

    /// Intersection over union under the inclusive pixel-range convention.
    fn iou_with<R>(&self, other: &R) -> Self::Type
    where
        R: Rect<Type = Self::Type> + RectNum,
    {
        let inter = self.pixel_intersection_with(other);
        inter / (self.pixel_area() + other.pixel_area() - inter)
    }

    /// Clip corners into `[0, W - 1]` x `[0, H - 1]`.
    fn clamp_to(&self, size: &HW<Self::Type>) -> XYXY<Self::Type> {
        let zero = Self::Type::zero();
        let one = Self::Type::one();
        let x_hi = size.w() - one;
        let y_hi = size.h() - one;
        XYXY {
            x_min: self.x_min().max(zero).min(x_hi),
            y_min: self.y_min().max(zero).min(y_hi),
            x_max: self.x_max().max(zero).min(x_hi),
            y_max: self.y_max().max(zero).min(y_hi),
        }
    }
}

impl<T> RectNum for T
where
    T: Rect,
    T::Type: Num + PartialOrd + Copy,
{
}

impl<T> RectFloat for T
where
    T: Rect,
    T::Type: Float,
{
}
