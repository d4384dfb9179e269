//! The 64-bit DCT perceptual hash: a thread-local `image_hasher::Hasher` configured for
//! `Mean` with `preproc_dct()` enabled and an 8x8 hash size. `image_hasher` resizes to
//! 32x32, takes the 2-D DCT, keeps the low-frequency 8x8 block (the DC term washes out of
//! a mean-threshold over the block the same way excluding it explicitly would), and sets
//! bit *i* when coefficient *i* exceeds the block's mean/median.

use std::cell::OnceCell;

use crate::fingerprint::hamming::Hamming;

thread_local! {
    static HASHER: OnceCell<Hasher> = OnceCell::new();
}

pub struct Hasher {
    hasher: image_hasher::Hasher,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            hasher: image_hasher::HasherConfig::new()
                .hash_size(8, 8)
                .hash_alg(image_hasher::HashAlg::Mean)
                .preproc_dct()
                .to_hasher(),
        }
    }

    pub fn hash<I>(&self, img: &I) -> Hamming
    where
        I: image_hasher::Image,
    {
        let hash = self.hasher.hash_image(img);
        Hamming::from_slice(hash.as_bytes())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash `img` using a thread-local, lazily constructed [`Hasher`].
pub fn hash<I>(img: &I) -> Hamming
where
    I: image_hasher::Image,
{
    HASHER.with(|h| h.get_or_init(Hasher::new).hash(img))
}

#[cfg(test)]
mod test {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn filled(w: u32, h: u32, r: u8, g: u8, b: u8) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
        ImageBuffer::from_fn(w, h, |_, _| Rgb([r, g, b]))
    }

    #[test]
    fn deterministic_across_calls() {
        let hasher = Hasher::new();
        let img = filled(64, 64, 120, 80, 200);
        assert_eq!(hasher.hash(&img), hasher.hash(&img));
    }

    #[test]
    fn different_images_differ() {
        let hasher = Hasher::new();
        let black = hasher.hash(&filled(64, 64, 0, 0, 0));
        let white = hasher.hash(&filled(64, 64, 255, 255, 255));
        assert_ne!(black, white);
    }
}
