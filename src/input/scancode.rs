/// ASCII to XT scancode. Control codes map to the key that produces them,
/// letters share the scancode of their lowercase key, shifted punctuation
/// shares the scancode of its unshifted key.
pub const ASCII_SCANCODE: [u8; 128] = [
    0x00, 0x1E, 0x30, 0x2E, 0x20, 0x12, 0x21, 0x22, //
    0x0E, 0x0F, 0x1C, 0x25, 0x26, 0x1C, 0x31, 0x18, //
    0x19, 0x10, 0x13, 0x1F, 0x14, 0x16, 0x2F, 0x11, //
    0x2D, 0x15, 0x2C, 0x01, 0x2B, 0x1B, 0x07, 0x0C, //
    0x39, 0x02, 0x28, 0x04, 0x05, 0x06, 0x08, 0x28, //
    0x0A, 0x0B, 0x09, 0x0D, 0x33, 0x0C, 0x34, 0x35, //
    0x0B, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, //
    0x09, 0x0A, 0x27, 0x27, 0x33, 0x0D, 0x34, 0x35, //
    0x03, 0x1E, 0x30, 0x2E, 0x20, 0x12, 0x21, 0x22, //
    0x23, 0x17, 0x24, 0x25, 0x26, 0x32, 0x31, 0x18, //
    0x19, 0x10, 0x13, 0x1F, 0x14, 0x16, 0x2F, 0x11, //
    0x2D, 0x15, 0x2C, 0x1A, 0x2B, 0x1B, 0x07, 0x0C, //
    0x29, 0x1E, 0x30, 0x2E, 0x20, 0x12, 0x21, 0x22, //
    0x23, 0x17, 0x24, 0x25, 0x26, 0x32, 0x31, 0x18, //
    0x19, 0x10, 0x13, 0x1F, 0x14, 0x16, 0x2F, 0x11, //
    0x2D, 0x15, 0x2C, 0x1A, 0x2B, 0x1B, 0x29, 0x0E, //
];
