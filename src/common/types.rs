//! Block geometry and classification types shared by transforms and quantization.

/// Reconstructed / reference sample. Wide enough for every supported bit depth.
pub type Pixel = u16;

/// Transform coefficient or residual sample, always kept in the signed 16-bit range.
pub type Coeff = i16;

/// Side length of a square transform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockSize {
    /// 4x4
    B4,
    /// 8x8
    B8,
    /// 16x16
    B16,
    /// 32x32
    B32,
}

impl BlockSize {
    /// All sizes from smallest to largest.
    pub const ALL: [BlockSize; 4] = [BlockSize::B4, BlockSize::B8, BlockSize::B16, BlockSize::B32];

    /// Block side in samples.
    #[inline]
    pub const fn width(self) -> usize {
        4 << self.size_id()
    }

    /// Number of coefficients in the block.
    #[inline]
    pub const fn area(self) -> usize {
        self.width() * self.width()
    }

    /// log2 of the block side (2..=5).
    #[inline]
    pub const fn log2(self) -> u32 {
        self.size_id() as u32 + 2
    }

    /// Scaling-list size index (0 for 4x4 through 3 for 32x32).
    #[inline]
    pub const fn size_id(self) -> usize {
        match self {
            BlockSize::B4 => 0,
            BlockSize::B8 => 1,
            BlockSize::B16 => 2,
            BlockSize::B32 => 3,
        }
    }

    /// Inverse of [`BlockSize::width`]. Returns `None` for unsupported widths.
    pub const fn from_width(width: usize) -> Option<Self> {
        match width {
            4 => Some(BlockSize::B4),
            8 => Some(BlockSize::B8),
            16 => Some(BlockSize::B16),
            32 => Some(BlockSize::B32),
            _ => None,
        }
    }

    /// Inverse of [`BlockSize::size_id`].
    pub const fn from_size_id(size_id: usize) -> Option<Self> {
        match size_id {
            0 => Some(BlockSize::B4),
            1 => Some(BlockSize::B8),
            2 => Some(BlockSize::B16),
            3 => Some(BlockSize::B32),
            _ => None,
        }
    }
}

/// Transform family and size. Only the DST at 4x4 and the DCT at every size exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// 4x4 integer DST, used for intra luma.
    Dst4,
    /// Integer DCT of the given size.
    Dct(BlockSize),
}

impl TransformKind {
    /// The transform HEVC mandates for a block: DST for 4x4 intra luma, DCT otherwise.
    #[inline]
    pub fn for_block(size: BlockSize, color: Color, cu_type: CuType) -> Self {
        if size == BlockSize::B4 && color == Color::Y && cu_type == CuType::Intra {
            TransformKind::Dst4
        } else {
            TransformKind::Dct(size)
        }
    }

    /// Block size the transform operates on.
    #[inline]
    pub const fn size(self) -> BlockSize {
        match self {
            TransformKind::Dst4 => BlockSize::B4,
            TransformKind::Dct(size) => size,
        }
    }
}

/// Colour component of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Color {
    /// Luma.
    #[default]
    Y,
    /// Blue-difference chroma.
    U,
    /// Red-difference chroma.
    V,
}

impl Color {
    /// Index into per-component tables (Y = 0, U = 1, V = 2).
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Color::Y => 0,
            Color::U => 1,
            Color::V => 2,
        }
    }

    /// True for U and V.
    #[inline]
    pub const fn is_chroma(self) -> bool {
        !matches!(self, Color::Y)
    }
}

/// Prediction type of the coding unit owning a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CuType {
    /// Intra-picture prediction.
    #[default]
    Intra,
    /// Inter-picture prediction.
    Inter,
}

/// Slice coding type. Decides the quantizer rounding offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SliceType {
    /// Intra-only slice.
    #[default]
    I,
    /// Predictive slice.
    P,
    /// Bi-predictive slice.
    B,
}

/// Coefficient scan pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScanOrder {
    /// Up-right diagonal.
    #[default]
    Diagonal,
    /// Row by row.
    Horizontal,
    /// Column by column.
    Vertical,
}

impl ScanOrder {
    /// All patterns, in HEVC `scanIdx` order.
    pub const ALL: [ScanOrder; 3] = [ScanOrder::Diagonal, ScanOrder::Horizontal, ScanOrder::Vertical];

    /// HEVC `scanIdx` value.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            ScanOrder::Diagonal => 0,
            ScanOrder::Horizontal => 1,
            ScanOrder::Vertical => 2,
        }
    }

    /// Mode-dependent coefficient scan.
    ///
    /// Intra blocks of 4x4 and 8x8 use a vertical scan for near-horizontal
    /// angular modes (6..=14) and a horizontal scan for near-vertical ones
    /// (22..=30). Everything else scans diagonally.
    pub fn select(cu_type: CuType, intra_mode: u8, size: BlockSize) -> Self {
        if cu_type == CuType::Intra && size <= BlockSize::B8 {
            match intra_mode {
                6..=14 => return ScanOrder::Vertical,
                22..=30 => return ScanOrder::Horizontal,
                _ => {}
            }
        }
        ScanOrder::Diagonal
    }
}
