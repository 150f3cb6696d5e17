use crate::text::{decode_string, resolution};
use crate::vm::VM;
use indexmap::IndexMap;
use log::debug;

/// A parsed dictionary: separator list, entry geometry, and a map from
/// each entry's decoded key to its byte address in the image.
#[derive(Debug, Clone)]
pub struct Dictionary {
    pub separators: Vec<char>,
    pub entry_length: u8,
    pub entry_count: usize,
    /// A negative entry count in the table marks it unsorted; lookups here
    /// go through the map either way.
    pub sorted: bool,
    words: IndexMap<String, u16>,
    version: u8,
}

impl Dictionary {
    /// Parse the dictionary table at `addr`.
    pub fn parse(memory: &[u8], addr: usize, version: u8) -> Result<Dictionary, String> {
        if addr >= memory.len() {
            return Err(format!("dictionary address {addr:#06x} out of bounds"));
        }
        let mut pos = addr;
        let n = memory[pos] as usize;
        pos += 1;
        if pos + n + 3 > memory.len() {
            return Err("dictionary header truncated".to_string());
        }
        let separators = memory[pos..pos + n].iter().map(|b| *b as char).collect();
        pos += n;
        let entry_length = memory[pos];
        pos += 1;
        let raw_count = ((memory[pos] as u16) << 8) | memory[pos + 1] as u16;
        pos += 2;
        let sorted = (raw_count as i16) >= 0;
        let entry_count = (raw_count as i16).unsigned_abs() as usize;

        let key_len = if version <= 3 { 4 } else { 6 };
        if (entry_length as usize) < key_len {
            return Err(format!("dictionary entry length {entry_length} too small"));
        }

        let mut words = IndexMap::with_capacity(entry_count);
        for i in 0..entry_count {
            let entry = pos + i * entry_length as usize;
            if entry + key_len > memory.len() {
                return Err("dictionary entries truncated".to_string());
            }
            match decode_string(&memory[entry..entry + key_len], false, None) {
                Ok((key, _)) => {
                    words.insert(key, entry as u16);
                }
                Err(e) => {
                    debug!("skipping undecodable dictionary entry {i}: {e}");
                }
            }
        }

        debug!(
            "dictionary at {addr:#06x}: {} entries of {} bytes, {} separators",
            entry_count, entry_length, n
        );
        Ok(Dictionary {
            separators,
            entry_length,
            entry_count,
            sorted,
            words,
            version,
        })
    }

    /// Look up a token, truncated to the dictionary's key width.
    /// Returns the entry address, or 0 when absent.
    pub fn lookup(&self, token: &str) -> u16 {
        let width = resolution(self.version);
        let truncated: String = token.chars().take(width).collect();
        self.words.get(&truncated).copied().unwrap_or(0)
    }
}

/// Split an input line into `(start, end)` byte spans. Spaces and tabs
/// separate tokens and are dropped; each separator character is its own
/// one-character token.
pub fn split_words(input: &str, separators: &[char]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in input.char_indices() {
        if c == ' ' || c == '\t' {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if separators.contains(&c) {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
            spans.push((i, i + c.len_utf8()));
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, input.len()));
    }
    spans
}

/// Tokenize `input` against `dict` and fill the parse buffer at
/// `parse_addr`: a capacity byte, a count byte, then one 4-byte record per
/// token (dictionary entry address, length, position in the text buffer).
/// When `store_zero` is false, records for unmatched words are left
/// untouched.
pub fn write_parse_buffer(
    vm: &mut VM,
    dict: &Dictionary,
    input: &str,
    parse_addr: u32,
    store_zero: bool,
) -> Result<(), String> {
    let max_tokens = vm.read_byte(parse_addr) as usize;
    let spans = split_words(input, &dict.separators);
    let found = spans.len().min(max_tokens);
    if spans.len() > max_tokens {
        debug!("parse buffer overflow: {} tokens, room for {max_tokens}", spans.len());
    }
    vm.write_byte(parse_addr + 1, found as u8)?;

    // Token positions are relative to the text buffer, whose preamble is
    // one byte (v1-3) or two (v4+).
    let bias = if vm.version() <= 3 { 1 } else { 2 };

    for (i, (start, end)) in spans.iter().take(found).enumerate() {
        let record = parse_addr + 2 + 4 * i as u32;
        let word = &input[*start..*end];
        let addr = dict.lookup(word);
        if addr == 0 && !store_zero {
            continue;
        }
        vm.write_word(record, addr)?;
        vm.write_byte(record + 2, (end - start) as u8)?;
        vm.write_byte(record + 3, (start + bias) as u8)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::encode;
    use crate::vm::tests::test_game;
    use crate::vm::{Game, VM};

    /// Lay out a v3 dictionary at `addr` with the given separators and words.
    pub fn build_dictionary(memory: &mut [u8], addr: usize, separators: &[u8], words: &[&str]) {
        let mut pos = addr;
        memory[pos] = separators.len() as u8;
        pos += 1;
        memory[pos..pos + separators.len()].copy_from_slice(separators);
        pos += separators.len();
        memory[pos] = 7; // entry length: 4-byte key + 3 data bytes
        pos += 1;
        memory[pos] = (words.len() >> 8) as u8;
        memory[pos + 1] = (words.len() & 0xff) as u8;
        pos += 2;
        for word in words {
            let key = encode(word, 3);
            memory[pos..pos + 4].copy_from_slice(&key);
            pos += 7;
        }
    }

    fn dict_vm() -> (VM, Dictionary) {
        let game = test_game(3);
        let mut memory = game.memory;
        build_dictionary(&mut memory, 0x0800, b".,\"", &["fred", "go", "fishing"]);
        let vm = VM::new(Game::from_memory(memory).unwrap());
        let dict = Dictionary::parse(&vm.game.memory, 0x0800, 3).unwrap();
        (vm, dict)
    }

    #[test]
    fn test_parse_header() {
        let (_, dict) = dict_vm();
        assert_eq!(dict.separators, vec!['.', ',', '"']);
        assert_eq!(dict.entry_length, 7);
        assert_eq!(dict.entry_count, 3);
        assert!(dict.sorted);
    }

    #[test]
    fn test_lookup() {
        let (_, dict) = dict_vm();
        assert_ne!(dict.lookup("fred"), 0);
        assert_ne!(dict.lookup("go"), 0);
        assert_eq!(dict.lookup("xyzzy"), 0);
        // Truncated to six characters before lookup.
        assert_eq!(dict.lookup("fishingrod"), dict.lookup("fishin"));
    }

    #[test]
    fn test_negative_entry_count_is_unsorted() {
        let game = test_game(3);
        let mut memory = game.memory;
        build_dictionary(&mut memory, 0x0800, b".", &["fred", "go"]);
        // Overwrite the count with -2.
        memory[0x0800 + 3] = 0xff;
        memory[0x0800 + 4] = 0xfe;
        let dict = Dictionary::parse(&memory, 0x0800, 3).unwrap();
        assert!(!dict.sorted);
        assert_eq!(dict.entry_count, 2);
        assert_ne!(dict.lookup("go"), 0);
    }

    #[test]
    fn test_split_words_with_separators() {
        let spans = split_words("fred,go fishing", &['.', ',', '"']);
        assert_eq!(spans, vec![(0, 4), (4, 5), (5, 7), (8, 15)]);
    }

    #[test]
    fn test_split_words_trims_edges() {
        let spans = split_words("  look  ", &[]);
        assert_eq!(spans, vec![(2, 6)]);
        assert!(split_words("   ", &[]).is_empty());
    }

    #[test]
    fn test_split_words_adjacent_separators() {
        let spans = split_words("a,,b", &[',']);
        assert_eq!(spans, vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
    }

    #[test]
    fn test_write_parse_buffer() {
        let (mut vm, dict) = dict_vm();
        let parse_addr = 0x0900;
        vm.game.memory[parse_addr as usize] = 10;

        write_parse_buffer(&mut vm, &dict, "fred,go xyzzy", parse_addr, true).unwrap();

        assert_eq!(vm.read_byte(parse_addr + 1), 4);
        // Token 0: "fred" at input position 0 -> buffer position 1.
        assert_eq!(vm.read_word(parse_addr + 2), dict.lookup("fred"));
        assert_eq!(vm.read_byte(parse_addr + 4), 4);
        assert_eq!(vm.read_byte(parse_addr + 5), 1);
        // Token 1: the comma separator.
        assert_eq!(vm.read_byte(parse_addr + 8), 1);
        assert_eq!(vm.read_byte(parse_addr + 9), 5);
        // Token 3: unknown word stores address 0.
        assert_eq!(vm.read_word(parse_addr + 14), 0);
        assert_eq!(vm.read_byte(parse_addr + 16), 5);
        assert_eq!(vm.read_byte(parse_addr + 17), 9);
    }

    #[test]
    fn test_parse_buffer_respects_store_zero() {
        let (mut vm, dict) = dict_vm();
        let parse_addr = 0x0900;
        vm.game.memory[parse_addr as usize] = 10;
        // Pre-fill the second record so we can see it survive.
        vm.write_word(parse_addr + 6, 0x7777).unwrap();

        write_parse_buffer(&mut vm, &dict, "fred xyzzy", parse_addr, false).unwrap();

        assert_eq!(vm.read_byte(parse_addr + 1), 2);
        assert_ne!(vm.read_word(parse_addr + 2), 0);
        assert_eq!(vm.read_word(parse_addr + 6), 0x7777);
    }

    #[test]
    fn test_parse_buffer_truncates_to_capacity() {
        let (mut vm, dict) = dict_vm();
        let parse_addr = 0x0900;
        vm.game.memory[parse_addr as usize] = 2;

        write_parse_buffer(&mut vm, &dict, "go go go go", parse_addr, true).unwrap();
        assert_eq!(vm.read_byte(parse_addr + 1), 2);
    }
}
