//! Slot thumbnails from `_NET_WM_ICON`.
//!
//! The property is a flat array of 32-bit words holding any number of
//! images back to back, each as `width, height, width × height` ARGB pixels
//! (alpha in the high byte, not premultiplied).

/// A decoded icon with premultiplied ARGB pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl IconImage {
    /// Top-left offset that centers this icon in a `width × height` box.
    /// Negative when the icon is larger than the box.
    pub fn centered_in(&self, width: u32, height: u32) -> (i32, i32) {
        (
            (width / 2) as i32 - (self.width / 2) as i32,
            (height / 2) as i32 - (self.height / 2) as i32,
        )
    }
}

/// Header of one image inside the property array.
struct Candidate {
    offset: usize,
    width: u32,
    height: u32,
}

fn candidates(data: &[u32]) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset + 2 <= data.len() {
        let width = data[offset];
        let height = data[offset + 1];
        let Some(len) = (width as usize).checked_mul(height as usize) else {
            break;
        };
        if width == 0 || height == 0 || offset + 2 + len > data.len() {
            break;
        }
        out.push(Candidate {
            offset,
            width,
            height,
        });
        offset += 2 + len;
    }
    out
}

/// Pick the icon to show in a `max_width × max_height` thumbnail.
///
/// The largest image strictly smaller than the box in both dimensions wins;
/// if none qualifies the first image is used.  Truncated trailing images are
/// ignored.  Returns `None` when the array holds no complete image.
pub fn select_icon(data: &[u32], max_width: u32, max_height: u32) -> Option<IconImage> {
    let all = candidates(data);
    let best = all
        .iter()
        .filter(|c| c.width < max_width && c.height < max_height)
        .fold(None::<&Candidate>, |best, c| match best {
            Some(b) if b.width as u64 * b.height as u64 >= c.width as u64 * c.height as u64 => {
                Some(b)
            }
            _ => Some(c),
        })
        .or_else(|| all.first())?;

    let start = best.offset + 2;
    let end = start + best.width as usize * best.height as usize;
    Some(IconImage {
        width: best.width,
        height: best.height,
        pixels: data[start..end].iter().copied().map(premultiply).collect(),
    })
}

/// Scale the colour channels of a straight-alpha ARGB pixel by its alpha.
pub fn premultiply(argb: u32) -> u32 {
    let a = argb >> 24;
    let scale = |shift: u32| (((argb >> shift) & 0xff) * a / 255) << shift;
    (a << 24) | scale(16) | scale(8) | scale(0)
}
