// ones' complement sum of 16 bit big endian words, RFC 1071; an odd
// trailing byte is padded with zero
fn ones_sum(buffer: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut words = buffer.chunks_exact(2);

    for word in &mut words {
        sum += ((word[0] as u32) << 8) | (word[1] as u32);
    }

    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    // fold carry bits into lower 16
    while (sum >> 16) > 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum
}

pub fn internet_checksum(buffer: &[u8]) -> u16 {
    !(ones_sum(buffer) as u16)
}
