//! Food placement and respawn-on-eat.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{Board, FoodData, Position};
use std::collections::HashSet;

/// Random probes before falling back to scanning every free cell
const RANDOM_PROBES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Food {
    pub position: Position,
}

impl Food {
    pub fn to_data(self) -> FoodData {
        FoodData {
            position: self.position,
        }
    }
}

/// Owns the food set of a round.
pub struct FoodSpawner {
    board: Board,
    count: usize,
    foods: Vec<Food>,
    rng: StdRng,
}

impl FoodSpawner {
    pub fn new(board: Board, count: usize) -> Self {
        Self::with_rng(board, count, StdRng::from_entropy())
    }

    pub fn with_seed(board: Board, count: usize, seed: u64) -> Self {
        Self::with_rng(board, count, StdRng::seed_from_u64(seed))
    }

    fn with_rng(board: Board, count: usize, rng: StdRng) -> Self {
        Self {
            board,
            count,
            foods: Vec::with_capacity(count),
            rng,
        }
    }

    /// Replaces the food set with `count` fresh items away from `occupied`.
    pub fn spawn_all(&mut self, occupied: &HashSet<Position>) {
        self.foods.clear();
        for _ in 0..self.count {
            let position = self.free_cell(occupied, None);
            self.foods.push(Food { position });
        }
        debug!("Spawned {} food items", self.foods.len());
    }

    pub fn clear(&mut self) {
        self.foods.clear();
    }

    /// Respawns every food item sitting on `head` and returns how many were eaten.
    pub fn eat_at(&mut self, head: Position, occupied: &HashSet<Position>) -> usize {
        let eaten: Vec<usize> = self
            .foods
            .iter()
            .enumerate()
            .filter(|(_, food)| food.position == head)
            .map(|(idx, _)| idx)
            .collect();

        for &idx in &eaten {
            self.respawn(idx, occupied);
        }
        eaten.len()
    }

    /// Moves one food item to a new free cell different from its current one.
    pub fn respawn(&mut self, idx: usize, occupied: &HashSet<Position>) {
        let previous = self.foods[idx].position;
        let position = self.free_cell(occupied, Some(previous));
        self.foods[idx].position = position;
        info!("Food respawned from {} to {}", previous, position);
    }

    /// Picks a cell that is neither occupied by a snake, by another food item,
    /// nor equal to `previous`.
    fn free_cell(&mut self, occupied: &HashSet<Position>, previous: Option<Position>) -> Position {
        let is_free = |pos: Position, foods: &[Food]| {
            !occupied.contains(&pos)
                && Some(pos) != previous
                && !foods.iter().any(|food| food.position == pos)
        };

        for _ in 0..RANDOM_PROBES {
            let pos = Position::new(
                self.rng.gen_range(0..self.board.width),
                self.rng.gen_range(0..self.board.height),
            );
            if is_free(pos, &self.foods) {
                return pos;
            }
        }

        let candidates: Vec<Position> = self
            .board
            .cells()
            .filter(|pos| is_free(*pos, &self.foods))
            .collect();
        match candidates.choose(&mut self.rng) {
            Some(pos) => *pos,
            // Board is full; staying put is the only option
            None => previous.unwrap_or_default(),
        }
    }

    pub fn foods(&self) -> &[Food] {
        &self.foods
    }

    pub fn positions(&self) -> HashSet<Position> {
        self.foods.iter().map(|food| food.position).collect()
    }

    pub fn to_data(&self) -> Vec<FoodData> {
        self.foods.iter().map(|food| food.to_data()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.foods.is_empty()
    }

    pub fn len(&self) -> usize {
        self.foods.len()
    }

    #[cfg(test)]
    pub(crate) fn place(&mut self, positions: &[Position]) {
        self.foods = positions.iter().map(|&position| Food { position }).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_all_within_board() {
        let board = Board::with_cells(40, 30);
        let mut spawner = FoodSpawner::with_seed(board, 2, 7);

        spawner.spawn_all(&HashSet::new());

        assert_eq!(spawner.len(), 2);
        for food in spawner.foods() {
            assert!(board.contains(food.position));
        }
        assert_ne!(spawner.foods()[0].position, spawner.foods()[1].position);
    }

    #[test]
    fn test_spawn_avoids_occupied_cells() {
        let board = Board::with_cells(3, 3);
        let occupied: HashSet<Position> = board
            .cells()
            .filter(|pos| *pos != Position::new(2, 2))
            .collect();
        let mut spawner = FoodSpawner::with_seed(board, 1, 1);

        spawner.spawn_all(&occupied);

        assert_eq!(spawner.foods()[0].position, Position::new(2, 2));
    }

    #[test]
    fn test_eat_at_respawns_elsewhere() {
        let board = Board::with_cells(40, 30);
        let mut spawner = FoodSpawner::with_seed(board, 2, 3);
        spawner.place(&[Position::new(10, 10), Position::new(20, 20)]);

        let occupied: HashSet<Position> = [Position::new(10, 10)].into_iter().collect();
        let eaten = spawner.eat_at(Position::new(10, 10), &occupied);

        assert_eq!(eaten, 1);
        let moved = spawner.foods()[0].position;
        assert_ne!(moved, Position::new(10, 10));
        assert_ne!(moved, Position::new(20, 20));
        assert!(board.contains(moved));
        assert_eq!(spawner.foods()[1].position, Position::new(20, 20));
    }

    #[test]
    fn test_eat_at_miss() {
        let board = Board::with_cells(40, 30);
        let mut spawner = FoodSpawner::with_seed(board, 1, 3);
        spawner.place(&[Position::new(10, 10)]);

        assert_eq!(spawner.eat_at(Position::new(11, 10), &HashSet::new()), 0);
        assert_eq!(spawner.foods()[0].position, Position::new(10, 10));
    }

    #[test]
    fn test_clear() {
        let mut spawner = FoodSpawner::with_seed(Board::default(), 2, 11);
        spawner.spawn_all(&HashSet::new());
        assert!(!spawner.is_empty());

        spawner.clear();
        assert!(spawner.is_empty());
        assert!(spawner.to_data().is_empty());
    }

    #[test]
    fn test_respawn_on_crowded_board() {
        let board = Board::with_cells(2, 1);
        let mut spawner = FoodSpawner::with_seed(board, 1, 5);
        spawner.place(&[Position::new(0, 0)]);

        spawner.respawn(0, &HashSet::new());
        assert_eq!(spawner.foods()[0].position, Position::new(1, 0));
    }
}
