// Node type and property identifiers
// These names are the persisted layout of an edit

// Node types
pub const EDIT: &str = "EDIT";
pub const TRACK: &str = "TRACK";
pub const MIDICLIP: &str = "MIDICLIP";
pub const SEQUENCE: &str = "SEQUENCE";
pub const NOTE: &str = "NOTE";
pub const CONTROL: &str = "CONTROL";
pub const SYSEX: &str = "SYSEX";

// Note properties
pub const NOTE_PITCH: &str = "p";
pub const NOTE_BEAT: &str = "b";
pub const NOTE_LENGTH: &str = "l";
pub const NOTE_VELOCITY: &str = "v";
pub const NOTE_COLOUR: &str = "c";
pub const NOTE_MUTE: &str = "m";

// Controller properties
pub const CONTROL_TYPE: &str = "type";
pub const CONTROL_VALUE: &str = "val";
pub const CONTROL_BEAT: &str = "b";
pub const CONTROL_METADATA: &str = "metadata";

// Sysex properties
pub const SYSEX_DATA: &str = "data";
pub const SYSEX_BEAT: &str = "time";

// Sequence properties
pub const CHANNEL: &str = "channelNumber";
pub const COMP: &str = "comp";
pub const IMPORTED_TRACK_NAME: &str = "importedName";
pub const IMPORTED_FILE_NAME: &str = "importedFileName";

// Clip properties
pub const NAME: &str = "name";
pub const ITEM_ID: &str = "id";
pub const START: &str = "start";
pub const LENGTH: &str = "length";
pub const OFFSET: &str = "offset";
pub const LOOP_START_BEATS: &str = "loopStartBeats";
pub const LOOP_LENGTH_BEATS: &str = "loopLengthBeats";
pub const ORIGINAL_LENGTH: &str = "originalLength";
pub const LOOPED_SEQUENCE_TYPE: &str = "loopedSequenceType";
pub const CURRENT_TAKE: &str = "currentTake";
pub const PROXY_ALLOWED: &str = "proxyAllowed";
pub const GROOVE_TEMPLATE: &str = "grooveTemplate";
pub const GROOVE_STRENGTH: &str = "grooveStrength";
pub const MPE_MODE: &str = "mpeMode";
pub const QUANTISATION_TYPE: &str = "quantisationType";
pub const QUANTISATION_PROPORTION: &str = "quantisationProportion";
pub const QUANTISE_NOTE_OFFS: &str = "quantiseNoteOffs";
pub const VOLUME_DB: &str = "volDb";
pub const MUTE: &str = "mute";
