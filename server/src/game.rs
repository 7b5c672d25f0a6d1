//! Board state for a single tic-tac-toe game embedded in an accepted invitation.

use protocol::GameRole;

/// Outcome of a completed game, used to post a rating update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Result_ {
    Draw,
    FirstWins,
    SecondWins,
}

/// Re-express a game's `Result_` (couched in terms of which `GameRole` won)
/// as a `Result_` couched in terms of whether `my_role` won, for feeding
/// directly into `player::post_result(me, opponent, ...)`.
pub fn from_role_result(my_role: GameRole, result: Result_) -> Result_ {
    match result {
        Result_::Draw => Result_::Draw,
        Result_::FirstWins if my_role == GameRole::First => Result_::FirstWins,
        Result_::SecondWins if my_role == GameRole::Second => Result_::FirstWins,
        _ => Result_::SecondWins,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    None,
    First,
    Second,
}

impl Cell {
    fn role(self) -> GameRole {
        match self {
            Cell::None => GameRole::None,
            Cell::First => GameRole::First,
            Cell::Second => GameRole::Second,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub cell: usize, // 0..8
    pub role: GameRole,
}

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("game has already terminated")]
    Terminated,
    #[error("it is not that player's turn")]
    WrongTurn,
    #[error("cell is already occupied")]
    CellOccupied,
    #[error("could not parse move string {0:?}")]
    BadMoveString(String),
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// A 3x3 tic-tac-toe board. Cells are numbered 1..9 on the wire, 0..8 internally.
pub struct Game {
    cells: [Cell; 9],
    to_move: GameRole,
    terminated: bool,
    winner: GameRole,
}

impl Default for Game {
    fn default() -> Self {
        Game::new()
    }
}

impl Game {
    pub fn new() -> Self {
        Game {
            cells: [Cell::None; 9],
            to_move: GameRole::First,
            terminated: false,
            winner: GameRole::None,
        }
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn winner(&self) -> GameRole {
        self.winner
    }

    pub fn to_move(&self) -> GameRole {
        self.to_move
    }

    /// Apply a move, painting a cell and swapping whose turn it is, then
    /// checking for termination.
    pub fn apply(&mut self, mv: Move) -> Result<(), GameError> {
        if self.terminated {
            return Err(GameError::Terminated);
        }
        if mv.role != self.to_move {
            return Err(GameError::WrongTurn);
        }
        if self.cells[mv.cell] != Cell::None {
            return Err(GameError::CellOccupied);
        }
        self.cells[mv.cell] = match mv.role {
            GameRole::First => Cell::First,
            GameRole::Second => Cell::Second,
            GameRole::None => unreachable!("to_move is never None before termination"),
        };
        self.to_move = self.to_move.other();
        self.check_termination();
        Ok(())
    }

    fn check_termination(&mut self) {
        for line in LINES {
            let [a, b, c] = line;
            if self.cells[a] != Cell::None && self.cells[a] == self.cells[b] && self.cells[b] == self.cells[c] {
                self.winner = self.cells[a].role();
                self.terminated = true;
                self.to_move = GameRole::None;
                return;
            }
        }
        if self.cells.iter().all(|c| *c != Cell::None) {
            self.winner = GameRole::None;
            self.terminated = true;
            self.to_move = GameRole::None;
        }
    }

    /// Resign on behalf of `role`; the opponent is recorded as the winner.
    pub fn resign(&mut self, role: GameRole) -> Result<(), GameError> {
        if self.terminated {
            return Err(GameError::Terminated);
        }
        self.terminated = true;
        self.to_move = GameRole::None;
        self.winner = role.other();
        Ok(())
    }

    pub fn result(&self) -> Result_ {
        match self.winner {
            GameRole::None => Result_::Draw,
            GameRole::First => Result_::FirstWins,
            GameRole::Second => Result_::SecondWins,
        }
    }

    /// Parse a move string: either a single digit `'1'..'9'`, or the
    /// four-character form `"<digit>-<X|O>"` where the letter must match
    /// whichever role is currently to move.
    pub fn parse_move(&self, role: GameRole, s: &str) -> Result<Move, GameError> {
        let bytes = s.as_bytes();
        match bytes.len() {
            1 => {
                let d = bytes[0];
                if d.is_ascii_digit() && d != b'0' {
                    Ok(Move {
                        cell: (d - b'1') as usize,
                        role,
                    })
                } else {
                    Err(GameError::BadMoveString(s.to_string()))
                }
            }
            4 => {
                let d = bytes[0];
                if !(d.is_ascii_digit() && d != b'0') || bytes[1] != b'-' {
                    return Err(GameError::BadMoveString(s.to_string()));
                }
                let expected = match bytes[2] {
                    b'X' => GameRole::First,
                    b'O' => GameRole::Second,
                    _ => return Err(GameError::BadMoveString(s.to_string())),
                };
                if expected != self.to_move {
                    return Err(GameError::BadMoveString(s.to_string()));
                }
                Ok(Move {
                    cell: (d - b'1') as usize,
                    role,
                })
            }
            _ => Err(GameError::BadMoveString(s.to_string())),
        }
    }

    /// Render the board as the fixed ASCII diagram from spec.md §4.2.
    pub fn render(&self) -> String {
        let ch = |c: Cell| match c {
            Cell::None => ' ',
            Cell::First => 'X',
            Cell::Second => 'O',
        };
        let row = |r: usize| {
            format!(
                "{}|{}|{}",
                ch(self.cells[r * 3]),
                ch(self.cells[r * 3 + 1]),
                ch(self.cells[r * 3 + 2])
            )
        };
        let mover = match self.to_move {
            GameRole::First => 'X',
            GameRole::Second => 'O',
            GameRole::None => match self.winner {
                GameRole::First => 'X',
                GameRole::Second => 'O',
                GameRole::None => ' ',
            },
        };
        format!(
            "{}\n-----\n{}\n-----\n{}\n{} to move\n",
            row(0),
            row(1),
            row(2),
            mover
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_player_wins_top_row() {
        let mut g = Game::new();
        g.apply(Move { cell: 0, role: GameRole::First }).unwrap();
        g.apply(Move { cell: 3, role: GameRole::Second }).unwrap();
        g.apply(Move { cell: 1, role: GameRole::First }).unwrap();
        g.apply(Move { cell: 4, role: GameRole::Second }).unwrap();
        g.apply(Move { cell: 2, role: GameRole::First }).unwrap();
        assert!(g.terminated());
        assert_eq!(g.winner(), GameRole::First);
    }

    #[test]
    fn full_board_with_no_line_is_a_draw() {
        let mut g = Game::new();
        // X O X / X O O / O X X -> no three in a row, board full
        let moves = [
            (0, GameRole::First),
            (1, GameRole::Second),
            (2, GameRole::First),
            (4, GameRole::Second),
            (3, GameRole::First),
            (5, GameRole::Second),
            (7, GameRole::First),
            (6, GameRole::Second),
            (8, GameRole::First),
        ];
        for (cell, role) in moves {
            g.apply(Move { cell, role }).unwrap();
        }
        assert!(g.terminated());
        assert_eq!(g.winner(), GameRole::None);
    }

    #[test]
    fn cannot_move_out_of_turn_or_onto_occupied_cell() {
        let mut g = Game::new();
        assert!(matches!(
            g.apply(Move { cell: 0, role: GameRole::Second }),
            Err(GameError::WrongTurn)
        ));
        g.apply(Move { cell: 0, role: GameRole::First }).unwrap();
        assert!(matches!(
            g.apply(Move { cell: 0, role: GameRole::Second }),
            Err(GameError::CellOccupied)
        ));
    }

    #[test]
    fn resign_sets_opponent_as_winner() {
        let mut g = Game::new();
        g.resign(GameRole::First).unwrap();
        assert!(g.terminated());
        assert_eq!(g.winner(), GameRole::Second);
        assert!(g.resign(GameRole::Second).is_err());
    }

    #[test]
    fn parse_move_accepts_digit_and_long_form() {
        let g = Game::new();
        assert_eq!(
            g.parse_move(GameRole::First, "1").unwrap(),
            Move { cell: 0, role: GameRole::First }
        );
        assert_eq!(
            g.parse_move(GameRole::First, "1-X").unwrap(),
            Move { cell: 0, role: GameRole::First }
        );
        assert!(g.parse_move(GameRole::First, "1-O").is_err());
        assert!(g.parse_move(GameRole::First, "0").is_err());
        assert!(g.parse_move(GameRole::First, "10").is_err());
    }

    #[test]
    fn render_reflects_board_and_mover() {
        let mut g = Game::new();
        g.apply(Move { cell: 4, role: GameRole::First }).unwrap();
        let rendered = g.render();
        let rows: Vec<&str> = rendered.lines().collect();
        assert_eq!(rows[0], " | | ");
        assert_eq!(rows[2], " |X| ");
        assert_eq!(rows[4], " | | ");
        assert_eq!(rows[5], "O to move");
    }
}
