/// FITS block size in bytes (each logical record is one block).
pub const BLOCK_SIZE: usize = 2880;

/// FITS card (keyword record) size in bytes.
pub const CARD_SIZE: usize = 80;

/// Number of cards that fit in a single block.
pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Padding byte used for header blocks (ASCII space).
pub const HEADER_PAD_BYTE: u8 = 0x20;

/// Padding byte used for data blocks (zero).
pub const DATA_PAD_BYTE: u8 = 0x00;

/// Returns the number of FITS blocks required to hold `num_bytes` bytes.
///
/// 0 bytes requires 0 blocks, 1 byte requires 1 block, 2880 bytes
/// requires 1 block, 2881 bytes requires 2 blocks.
pub const fn blocks_needed(num_bytes: usize) -> usize {
    if num_bytes == 0 {
        return 0;
    }
    num_bytes.div_ceil(BLOCK_SIZE)
}

/// Returns the total byte length (in whole blocks) required to hold `num_bytes`.
pub const fn padded_byte_len(num_bytes: usize) -> usize {
    blocks_needed(num_bytes) * BLOCK_SIZE
}

/// Extends `buf` with `pad_byte` up to the next block boundary.
fn pad_to_block(buf: &mut Vec<u8>, pad_byte: u8) {
    let target = padded_byte_len(buf.len());
    buf.resize(target, pad_byte);
}

/// Pads a serialized header to a block boundary with ASCII spaces.
pub fn pad_header(buf: &mut Vec<u8>) {
    pad_to_block(buf, HEADER_PAD_BYTE);
}

/// Pads a serialized data segment to a block boundary with zero bytes.
pub fn pad_data(buf: &mut Vec<u8>) {
    pad_to_block(buf, DATA_PAD_BYTE);
}
