//! User-facing 1/2/3-dimensional size specifications.

use crate::error::{err, Result, Status};

/// One, two or three spatial dimensions, for global and local work
/// sizes and offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpatialDims {
    One(usize),
    Two(usize, usize),
    Three(usize, usize, usize),
}

impl SpatialDims {
    pub fn dim_count(&self) -> usize {
        match *self {
            SpatialDims::One(..) => 1,
            SpatialDims::Two(..) => 2,
            SpatialDims::Three(..) => 3,
        }
    }

    pub fn to_vec(&self) -> Vec<usize> {
        match *self {
            SpatialDims::One(a) => vec![a],
            SpatialDims::Two(a, b) => vec![a, b],
            SpatialDims::Three(a, b, c) => vec![a, b, c],
        }
    }

    /// The linear number of elements.
    pub fn to_len(&self) -> usize {
        match *self {
            SpatialDims::One(a) => a,
            SpatialDims::Two(a, b) => a * b,
            SpatialDims::Three(a, b, c) => a * b * c,
        }
    }

    pub(crate) fn matching_dims(&self, other: &SpatialDims) -> Result<()> {
        if self.dim_count() == other.dim_count() {
            Ok(())
        } else {
            err(
                Status::InvalidWorkDimension,
                "mismatched dimension counts between sizes",
            )
        }
    }
}

macro_rules! impl_from_scalar {
    ($($t:ty),*) => {$(
        impl From<$t> for SpatialDims {
            fn from(a: $t) -> SpatialDims {
                SpatialDims::One(a as usize)
            }
        }

        impl From<[$t; 1]> for SpatialDims {
            fn from(a: [$t; 1]) -> SpatialDims {
                SpatialDims::One(a[0] as usize)
            }
        }

        impl From<[$t; 2]> for SpatialDims {
            fn from(a: [$t; 2]) -> SpatialDims {
                SpatialDims::Two(a[0] as usize, a[1] as usize)
            }
        }

        impl From<[$t; 3]> for SpatialDims {
            fn from(a: [$t; 3]) -> SpatialDims {
                SpatialDims::Three(a[0] as usize, a[1] as usize, a[2] as usize)
            }
        }
    )*};
}

impl_from_scalar!(usize, u32, i32, u64, i64);

impl From<(usize,)> for SpatialDims {
    fn from(a: (usize,)) -> SpatialDims {
        SpatialDims::One(a.0)
    }
}

impl From<(usize, usize)> for SpatialDims {
    fn from(a: (usize, usize)) -> SpatialDims {
        SpatialDims::Two(a.0, a.1)
    }
}

impl From<(usize, usize, usize)> for SpatialDims {
    fn from(a: (usize, usize, usize)) -> SpatialDims {
        SpatialDims::Three(a.0, a.1, a.2)
    }
}
