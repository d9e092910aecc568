// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Miscellaneous helper functions that didn't fit elsewhere.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use png::{self, HasParameters};
use std::{self, fs::File, io::BufWriter, io::Cursor, path::Path};

/// Read a 16 bit gray png image from a file.
pub fn read_png_16bits<P: AsRef<Path>>(
    file_path: P,
) -> Result<(usize, usize, Vec<u16>), png::DecodingError> {
    // Load 16 bits PNG disparity image.
    let img_file = File::open(file_path)?;
    let mut decoder = png::Decoder::new(img_file);
    // Use the IDENTITY transformation because by default
    // it will use STRIP_16 which only keep 8 bits.
    decoder.set(png::Transformations::IDENTITY);
    let (info, mut reader) = decoder.read_info()?;
    let mut buffer = vec![0; info.buffer_size()];
    reader.next_frame(&mut buffer)?;

    // Transform buffer into 16 bits slice.
    let mut buffer_u16 = vec![0; (info.width * info.height) as usize];
    let mut buffer_cursor = Cursor::new(buffer);
    buffer_cursor.read_u16_into::<BigEndian>(&mut buffer_u16)?;

    // Return u16 buffer.
    Ok((info.width as usize, info.height as usize, buffer_u16))
}

/// Write a 16 bit gray png image to a file.
/// Inverse operation of `read_png_16bits`.
pub fn write_png_16bits<P: AsRef<Path>>(
    file_path: P,
    width: usize,
    height: usize,
    data: &[u16],
) -> Result<(), png::EncodingError> {
    assert_eq!(data.len(), width * height);
    let img_file = File::create(file_path)?;
    let buf_writer = BufWriter::new(img_file);
    let mut encoder = png::Encoder::new(buf_writer, width as u32, height as u32);
    encoder
        .set(png::ColorType::Grayscale)
        .set(png::BitDepth::Sixteen);
    let mut writer = encoder.write_header()?;

    // PNG 16 bits samples are big-endian.
    let mut buffer = Vec::with_capacity(2 * data.len());
    for &value in data.iter() {
        buffer.write_u16::<BigEndian>(value)?;
    }
    writer.write_image_data(&buffer)?;
    Ok(())
}

/// Compute the quotient and remainder of x/y both at the same time.
pub fn div_rem<T>(x: T, y: T) -> (T, T)
where
    T: std::ops::Div<Output = T> + std::ops::Rem<Output = T> + Copy,
{
    (x / y, x % y)
}
