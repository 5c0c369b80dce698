use crate::net::{PacketError, PacketReader, PacketWriter, PlayerId};

/// Display helper: game speed relative to the 75 fps reference, rounded.
pub fn speed_percent(fps: u32) -> u32 {
    (0.5 + 100.0 / 75.0 * fps as f64) as u32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenGame {
    pub id: u32,
    pub name: String,
    pub rules_index: u8,
    pub speed_index: u8,
    pub score: u8,
    pub has_password: bool,
}

/// Catalog and open-game list as last announced by the server. Indices are
/// positional and only meaningful against the same packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerStatusData {
    pub player_count: u32,
    pub possible_speeds: Vec<u32>,
    pub possible_rules: Vec<String>,
    pub possible_rules_author: Vec<String>,
    pub open_games: Vec<OpenGame>,
}

impl ServerStatusData {
    pub fn game(&self, index: usize) -> Option<&OpenGame> {
        self.open_games.get(index)
    }

    pub fn speed(&self, index: usize) -> Option<u32> {
        self.possible_speeds.get(index).copied()
    }

    pub fn rules(&self, index: usize) -> Option<(&str, &str)> {
        let title = self.possible_rules.get(index)?;
        let author = self.possible_rules_author.get(index)?;
        Some((title, author))
    }

    pub fn encode(&self, writer: &mut PacketWriter) {
        writer
            .write_u32(self.player_count)
            .write(&self.possible_speeds)
            .write(&self.possible_rules)
            .write(&self.possible_rules_author);

        let ids: Vec<u32> = self.open_games.iter().map(|g| g.id).collect();
        let names: Vec<String> = self.open_games.iter().map(|g| g.name.clone()).collect();
        let speeds: Vec<u8> = self.open_games.iter().map(|g| g.speed_index).collect();
        let rules: Vec<u8> = self.open_games.iter().map(|g| g.rules_index).collect();
        let scores: Vec<u8> = self.open_games.iter().map(|g| g.score).collect();
        let passwords: Vec<bool> = self.open_games.iter().map(|g| g.has_password).collect();

        writer
            .write(&ids)
            .write(&names)
            .write(&speeds)
            .write(&rules)
            .write(&scores)
            .write(&passwords);
    }

    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let player_count = reader.read_u32()?;
        let possible_speeds: Vec<u32> = reader.read()?;
        let possible_rules: Vec<String> = reader.read()?;
        let possible_rules_author: Vec<String> = reader.read()?;
        check_column("possible_rules_author", possible_rules.len(), possible_rules_author.len())?;

        let ids: Vec<u32> = reader.read()?;
        let names: Vec<String> = reader.read()?;
        let speeds: Vec<u8> = reader.read()?;
        let rules: Vec<u8> = reader.read()?;
        let scores: Vec<u8> = reader.read()?;
        let passwords: Vec<bool> = reader.read()?;

        let count = ids.len();
        check_column("game_names", count, names.len())?;
        check_column("game_speeds", count, speeds.len())?;
        check_column("game_rules", count, rules.len())?;
        check_column("game_scores", count, scores.len())?;
        check_column("game_passwords", count, passwords.len())?;

        let mut open_games = Vec::with_capacity(count);
        for i in 0..count {
            check_index("speed_index", speeds[i] as usize, possible_speeds.len())?;
            check_index("rules_index", rules[i] as usize, possible_rules.len())?;
            open_games.push(OpenGame {
                id: ids[i],
                name: names[i].clone(),
                rules_index: rules[i],
                speed_index: speeds[i],
                score: scores[i],
                has_password: passwords[i],
            });
        }

        Ok(Self {
            player_count,
            possible_speeds,
            possible_rules,
            possible_rules_author,
            open_games,
        })
    }
}

/// Payload of a `GAME_STATUS` packet: the pending game the receiver is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStatus {
    pub game_id: u32,
    pub creator: PlayerId,
    pub name: String,
    pub speed: u32,
    pub rules: u32,
    pub score: u32,
    pub other_players: Vec<PlayerId>,
    pub other_player_names: Vec<String>,
}

impl GameStatus {
    pub fn encode(&self, writer: &mut PacketWriter) {
        writer
            .write_u32(self.game_id)
            .write_u32(self.creator)
            .write_string(&self.name)
            .write_u32(self.speed)
            .write_u32(self.rules)
            .write_u32(self.score)
            .write(&self.other_players)
            .write(&self.other_player_names);
    }

    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let status = Self {
            game_id: reader.read_u32()?,
            creator: reader.read_u32()?,
            name: reader.read_string()?,
            speed: reader.read_u32()?,
            rules: reader.read_u32()?,
            score: reader.read_u32()?,
            other_players: reader.read()?,
            other_player_names: reader.read()?,
        };
        check_column(
            "other_player_names",
            status.other_players.len(),
            status.other_player_names.len(),
        )?;
        Ok(status)
    }
}

fn check_column(field: &'static str, expected: usize, actual: usize) -> Result<(), PacketError> {
    if expected != actual {
        return Err(PacketError::MisalignedColumns {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_index(field: &'static str, index: usize, len: usize) -> Result<(), PacketError> {
    if index >= len {
        return Err(PacketError::IndexOutOfRange { field, index, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ServerStatusData {
        ServerStatusData {
            player_count: 4,
            possible_speeds: vec![60, 75, 90],
            possible_rules: vec!["Default".into(), "Sticky".into()],
            possible_rules_author: vec!["Daniel".into(), "Jonathan".into()],
            open_games: vec![
                OpenGame {
                    id: 11,
                    name: "first".into(),
                    rules_index: 1,
                    speed_index: 0,
                    score: 15,
                    has_password: true,
                },
                OpenGame {
                    id: 12,
                    name: "second".into(),
                    rules_index: 0,
                    speed_index: 2,
                    score: 5,
                    has_password: false,
                },
            ],
        }
    }

    fn encoded(status: &ServerStatusData) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        status.encode(&mut writer);
        writer.into_bytes()
    }

    #[test]
    fn test_status_preserves_catalog_order() {
        let status = catalog();
        let bytes = encoded(&status);
        let decoded = ServerStatusData::decode(&mut PacketReader::new(&bytes)).unwrap();
        assert_eq!(decoded, status);
        assert_eq!(decoded.rules(1), Some(("Sticky", "Jonathan")));
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mut status = catalog();
        status.open_games[1].speed_index = 3;
        let bytes = encoded(&status);
        assert!(matches!(
            ServerStatusData::decode(&mut PacketReader::new(&bytes)),
            Err(PacketError::IndexOutOfRange {
                field: "speed_index",
                index: 3,
                len: 3
            })
        ));
    }

    #[test]
    fn test_misaligned_authors_are_rejected() {
        let mut status = catalog();
        status.possible_rules_author.pop();
        let bytes = encoded(&status);
        assert!(matches!(
            ServerStatusData::decode(&mut PacketReader::new(&bytes)),
            Err(PacketError::MisalignedColumns { .. })
        ));
    }

    #[test]
    fn test_truncated_status_is_rejected() {
        let bytes = encoded(&catalog());
        let cut = &bytes[..bytes.len() - 1];
        assert!(matches!(
            ServerStatusData::decode(&mut PacketReader::new(cut)),
            Err(PacketError::Codec(_))
        ));
    }

    #[test]
    fn test_game_status_name_columns_must_match() {
        let status = GameStatus {
            game_id: 3,
            creator: 9,
            name: "match".into(),
            speed: 1,
            rules: 0,
            score: 15,
            other_players: vec![4, 5],
            other_player_names: vec!["only one".into()],
        };
        let mut writer = PacketWriter::new();
        status.encode(&mut writer);
        assert!(GameStatus::decode(&mut PacketReader::new(writer.as_bytes())).is_err());
    }

    #[test]
    fn test_speed_percent() {
        assert_eq!(speed_percent(75), 100);
        assert_eq!(speed_percent(60), 80);
        assert_eq!(speed_percent(90), 120);
    }
}
