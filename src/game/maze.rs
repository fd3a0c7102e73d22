//! Maze engine
//!
//! A rectangular grid of cells where every passage is tracked per character.
//! Movement is gated by physical connectivity (a passage visible to either
//! character), while each client is only told about the passages its own
//! character can see.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::game::character::Character;
use crate::game::constants::{cell as layout, maze as tuning};
use crate::util::grid::{Coordinate, Direction};

/// Which characters can see a passage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Both,
    Only(Character),
}

impl Visibility {
    /// Roll visibility for a freshly opened passage
    pub fn roll<R: Rng>(rng: &mut R) -> Self {
        let roll: f64 = rng.gen();
        if roll < tuning::IO_ONLY_CHANCE {
            Visibility::Only(Character::Io)
        } else if roll < tuning::IO_ONLY_CHANCE + tuning::BLAIR_ONLY_CHANCE {
            Visibility::Only(Character::Blair)
        } else {
            Visibility::Both
        }
    }

    #[inline]
    pub fn includes(self, character: Character) -> bool {
        match self {
            Visibility::Both => character.is_concrete(),
            Visibility::Only(only) => only == character && character.is_concrete(),
        }
    }
}

/// One maze cell: four passage bits per character plus a coin flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell(u16);

impl Cell {
    fn shift_for(character: Character) -> Option<usize> {
        match character {
            Character::Io => Some(layout::IO_SHIFT),
            Character::Blair => Some(layout::BLAIR_SHIFT),
            Character::Unset => None,
        }
    }

    /// Whether `character` can see a passage leaving this cell in `direction`
    #[inline]
    pub fn visible(self, character: Character, direction: Direction) -> bool {
        Self::shift_for(character)
            .map(|shift| self.0 & (1 << (shift + direction.index())) != 0)
            .unwrap_or(false)
    }

    pub fn set_visible(&mut self, character: Character, direction: Direction, value: bool) {
        let Some(shift) = Self::shift_for(character) else {
            return;
        };
        let mask = 1 << (shift + direction.index());
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    /// Physically open: visible to at least one character
    #[inline]
    pub fn open(self, direction: Direction) -> bool {
        self.visible(Character::Io, direction) || self.visible(Character::Blair, direction)
    }

    /// Visible to both characters
    #[inline]
    pub fn shared(self, direction: Direction) -> bool {
        self.visible(Character::Io, direction) && self.visible(Character::Blair, direction)
    }

    pub fn any_open(self) -> bool {
        Direction::ALL.into_iter().any(|direction| self.open(direction))
    }

    #[inline]
    pub fn has_coin(self) -> bool {
        self.0 & (1 << layout::COIN_BIT) != 0
    }

    pub fn set_coin(&mut self, value: bool) {
        if value {
            self.0 |= 1 << layout::COIN_BIT;
        } else {
            self.0 &= !(1 << layout::COIN_BIT);
        }
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Encode this cell as seen by `character`
    ///
    /// Bits 0-3: passages both characters see. Bits 4-7: passages only
    /// `character` sees. Bit 8: coin. `Unset` learns nothing.
    pub fn serialize_for(self, character: Character) -> u16 {
        if !character.is_concrete() {
            return 0;
        }

        let mut encoded = 0u16;
        for direction in Direction::ALL {
            if self.shared(direction) {
                encoded |= 1 << (layout::SHARED_SHIFT + direction.index());
            } else if self.visible(character, direction) {
                encoded |= 1 << (layout::EXCLUSIVE_SHIFT + direction.index());
            }
        }
        if self.has_coin() {
            encoded |= 1 << layout::COIN_BIT;
        }
        encoded
    }
}

/// DFS frame used by `Maze::randomize`
struct Frame {
    at: Coordinate,
    order: [Direction; 4],
    next: usize,
}

impl Frame {
    fn new<R: Rng>(at: Coordinate, rng: &mut R) -> Self {
        let mut order = Direction::ALL;
        order.shuffle(rng);
        Self { at, order, next: 0 }
    }

    fn next_direction(&mut self) -> Option<Direction> {
        let direction = self.order.get(self.next).copied();
        self.next += 1;
        direction
    }
}

/// Rectangular maze with a fixed start (top-left) and end (bottom-right)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Maze {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
    start: Coordinate,
    end: Coordinate,
}

impl Maze {
    /// Create a maze with every passage closed
    pub fn new(rows: usize, cols: usize) -> Self {
        assert!(rows > 0 && cols > 0, "maze dimensions must be non-zero");
        Self {
            rows,
            cols,
            cells: vec![Cell::default(); rows * cols],
            start: Coordinate::ORIGIN,
            end: Coordinate::new(cols as i32 - 1, rows as i32 - 1),
        }
    }

    /// Create a maze and immediately randomize it
    pub fn generate<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Self {
        let mut maze = Self::new(rows, cols);
        maze.randomize(rng);
        maze
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn start(&self) -> Coordinate {
        self.start
    }

    pub fn end(&self) -> Coordinate {
        self.end
    }

    #[inline]
    pub fn in_bounds(&self, at: Coordinate) -> bool {
        at.x >= 0 && at.y >= 0 && (at.x as usize) < self.cols && (at.y as usize) < self.rows
    }

    #[inline]
    fn index(&self, at: Coordinate) -> Option<usize> {
        self.in_bounds(at)
            .then(|| at.y as usize * self.cols + at.x as usize)
    }

    pub fn cell(&self, at: Coordinate) -> Option<&Cell> {
        self.index(at).map(|i| &self.cells[i])
    }

    /// Close every passage and remove every coin
    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(Cell::clear);
    }

    /// Open the edge between `at` and its neighbour in `direction` on both sides
    ///
    /// Returns false (and changes nothing) when either side is out of bounds.
    pub fn open_passage(&mut self, at: Coordinate, direction: Direction, visibility: Visibility) -> bool {
        let (Some(from), Some(to)) = (self.index(at), self.index(at.step(direction))) else {
            return false;
        };

        for character in [Character::Io, Character::Blair] {
            if visibility.includes(character) {
                self.cells[from].set_visible(character, direction, true);
                self.cells[to].set_visible(character, direction.opposite(), true);
            }
        }
        true
    }

    /// Regenerate the layout with an iterative randomized depth-first search
    ///
    /// Every cell ends up connected to the start cell. Coins are dropped on
    /// cells as they are finished (all four directions tried).
    pub fn randomize<R: Rng>(&mut self, rng: &mut R) {
        self.clear();

        let mut visited = vec![false; self.cells.len()];
        let mut stack: Vec<Frame> = Vec::with_capacity(self.cells.len());

        if let Some(origin) = self.index(self.start) {
            visited[origin] = true;
            stack.push(Frame::new(self.start, rng));
        }

        while let Some(frame) = stack.last_mut() {
            let from = frame.at;
            let Some(direction) = frame.next_direction() else {
                stack.pop();
                if rng.gen_bool(tuning::COIN_CHANCE) {
                    self.place_coin(from);
                }
                continue;
            };

            let to = from.step(direction);
            match self.index(to) {
                Some(i) if !visited[i] => {
                    visited[i] = true;
                    let visibility = Visibility::roll(rng);
                    self.open_passage(from, direction, visibility);
                    stack.push(Frame::new(to, rng));
                }
                _ => {}
            }
        }
    }

    /// Whether a participant may step from `a` to `b`
    ///
    /// Knowledge does not matter here: a passage only the partner can see is
    /// still walkable.
    pub fn traversable(&self, a: Coordinate, b: Coordinate) -> bool {
        if !self.in_bounds(b) {
            return false;
        }
        match (a.direction_to(b), self.cell(a)) {
            (Some(direction), Some(cell)) => cell.open(direction),
            _ => false,
        }
    }

    /// Row-major grid encoded for `character` (see `Cell::serialize_for`)
    pub fn serialize_for(&self, character: Character) -> Vec<Vec<u16>> {
        self.cells
            .chunks(self.cols)
            .map(|row| row.iter().map(|cell| cell.serialize_for(character)).collect())
            .collect()
    }

    /// Single cell encoded for `character`, 0 when out of bounds
    pub fn serialize_cell(&self, at: Coordinate, character: Character) -> u16 {
        self.cell(at)
            .map(|cell| cell.serialize_for(character))
            .unwrap_or(0)
    }

    /// Put a coin on `at`; false when out of bounds
    pub fn place_coin(&mut self, at: Coordinate) -> bool {
        match self.index(at) {
            Some(i) => {
                self.cells[i].set_coin(true);
                true
            }
            None => false,
        }
    }

    /// Remove the coin on `at`, returning whether there was one
    pub fn take_coin(&mut self, at: Coordinate) -> bool {
        let Some(i) = self.index(at) else {
            return false;
        };
        let had_coin = self.cells[i].has_coin();
        self.cells[i].set_coin(false);
        had_coin
    }

    pub fn any_coin(&self) -> bool {
        self.cells.iter().any(|cell| cell.has_coin())
    }

    pub fn coin_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.has_coin()).count()
    }
}
