//! Collision primitives and resolution passes
//!
//! Everything happens on the ground plane. Players are spheres, walls are unit
//! boxes and shells are small boxes. Each resolution pass only moves the
//! objects it is about; damage and deaths are reported to the caller.

use crate::arena::{Arena, CellType};
use crate::world::{Player, TankShell};
use crate::{PlayerId, PLAYER_RADIUS, SHELL_DAMAGE, SHELL_HALF_EXTENT};
use glam::Vec2;
use std::collections::BTreeMap;

/// Closest point of the box `[min, max]` to `point`.
fn closest_point(point: Vec2, min: Vec2, max: Vec2) -> Vec2 {
    point.clamp(min, max)
}

/// Vector that moves the sphere out of the box, or zero when they don't touch.
pub fn sphere_aabb(center: Vec2, radius: f32, min: Vec2, max: Vec2) -> Vec2 {
    let closest = closest_point(center, min, max);
    let offset = center - closest;
    let dist_sq = offset.length_squared();
    if dist_sq.is_nan() || dist_sq > radius * radius {
        return Vec2::ZERO;
    }

    if dist_sq > f32::EPSILON {
        let dist = dist_sq.sqrt();
        return offset / dist * (radius - dist);
    }

    // Centre inside the box: leave through the nearest face
    let to_min = center - min;
    let to_max = max - center;
    let candidates = [
        (to_min.x, Vec2::NEG_X),
        (to_max.x, Vec2::X),
        (to_min.y, Vec2::NEG_Y),
        (to_max.y, Vec2::Y),
    ];
    let (depth, normal) = candidates
        .into_iter()
        .fold((f32::MAX, Vec2::ZERO), |best, c| if c.0 < best.0 { c } else { best });
    normal * (depth + radius)
}

/// Vector that moves sphere 1 away from sphere 2, or zero when they don't touch.
pub fn sphere_sphere(c1: Vec2, r1: f32, c2: Vec2, r2: f32) -> Vec2 {
    let dir = c1 - c2;
    let reach = r1 + r2;
    let dist_sq = dir.length_squared();
    if dist_sq.is_nan() || dist_sq > reach * reach {
        return Vec2::ZERO;
    }
    let dist = dist_sq.sqrt();
    let normal = if dist > f32::EPSILON { dir / dist } else { Vec2::X };
    normal * (reach - dist)
}

/// Box overlap test on centres and half extents.
pub fn aabb_overlap(c1: Vec2, half1: Vec2, c2: Vec2, half2: Vec2) -> bool {
    let d = (c1 - c2).abs();
    let reach = half1 + half2;
    d.x < reach.x && d.y < reach.y
}

fn sphere_touches_aabb(center: Vec2, radius: f32, min: Vec2, max: Vec2) -> bool {
    center.distance_squared(closest_point(center, min, max)) <= radius * radius
}

/// Cells outside the grid behave like walls.
fn is_solid(arena: &Arena, x: i64, y: i64) -> bool {
    arena.cell_at(x, y).map_or(true, |c| c == CellType::Wall)
}

/// Pushes a player out of every wall in the 3×3 neighbourhood of its cell.
pub fn resolve_player_walls(arena: &Arena, player: &mut Player) {
    let (cx, cy) = Arena::cell_of(player.ground_position());
    for y in cy - 1..=cy + 1 {
        for x in cx - 1..=cx + 1 {
            if !is_solid(arena, x, y) {
                continue;
            }
            let (min, max) = Arena::cell_bounds(x, y);
            let separation = sphere_aabb(player.ground_position(), PLAYER_RADIUS, min, max);
            player.position += separation.extend(0.0);
        }
    }
}

/// Pushes every overlapping pair of live players apart, half each.
pub fn resolve_player_collisions(players: &mut BTreeMap<PlayerId, Player>) {
    let mut live: Vec<&mut Player> = players.values_mut().filter(|p| p.is_alive()).collect();
    for i in 0..live.len() {
        let (head, tail) = live.split_at_mut(i + 1);
        let a = &mut head[i];
        for b in tail.iter_mut() {
            let separation = sphere_sphere(
                a.ground_position(),
                PLAYER_RADIUS,
                b.ground_position(),
                PLAYER_RADIUS,
            );
            if separation != Vec2::ZERO {
                let half = (separation * 0.5).extend(0.0);
                a.position += half;
                b.position -= half;
            }
        }
    }
}

/// A shell hit that took the target's health to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kill {
    pub killed: PlayerId,
    pub killer: PlayerId,
}

fn shell_hits_wall(arena: &Arena, shell: &TankShell) -> bool {
    let half = Vec2::splat(SHELL_HALF_EXTENT);
    let (cx, cy) = Arena::cell_of(shell.position);
    for y in cy - 1..=cy + 1 {
        for x in cx - 1..=cx + 1 {
            if !is_solid(arena, x, y) {
                continue;
            }
            let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            if aabb_overlap(shell.position, half, center, Vec2::splat(0.5)) {
                return true;
            }
        }
    }
    false
}

/// Destroys shells that hit a wall or a player other than their owner and
/// applies damage. Kills are returned, never acted on here.
pub fn resolve_shell_collisions(
    arena: &Arena,
    players: &mut BTreeMap<PlayerId, Player>,
    shells: &mut Vec<TankShell>,
) -> Vec<Kill> {
    let mut kills = Vec::new();
    let mut removed = Vec::new();
    let half = Vec2::splat(SHELL_HALF_EXTENT);

    for (index, shell) in shells.iter().enumerate() {
        if shell_hits_wall(arena, shell) {
            removed.push(index);
            continue;
        }

        let (min, max) = (shell.position - half, shell.position + half);
        let target = players.values_mut().find(|p| {
            p.id != shell.owner
                && p.is_alive()
                && sphere_touches_aabb(p.ground_position(), PLAYER_RADIUS, min, max)
        });
        if let Some(target) = target {
            if target.take_damage(SHELL_DAMAGE) {
                kills.push(Kill {
                    killed: target.id,
                    killer: shell.owner,
                });
            }
            removed.push(index);
        }
    }

    remove_indices(shells, removed);
    kills
}

/// Removes the given indices by swapping each with the current tail and
/// truncating once. Order of the survivors is not preserved.
pub fn remove_indices<T>(items: &mut Vec<T>, mut indices: Vec<usize>) {
    indices.sort_unstable();
    indices.dedup();
    let mut end = items.len();
    for &index in indices.iter().rev() {
        if index >= end {
            continue;
        }
        end -= 1;
        items.swap(index, end);
    }
    items.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_HEALTH;
    use assert_approx_eq::assert_approx_eq;
    use glam::Vec3;

    #[test]
    fn test_sphere_aabb_penetration_depth() {
        let (min, max) = (Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0));

        let separation = sphere_aabb(Vec2::new(1.4, 0.5), 0.5, min, max);
        assert_approx_eq!(separation.length(), 0.1, 1e-5);
        assert!(separation.x > 0.0);

        let clear = sphere_aabb(Vec2::new(1.6, 0.5), 0.5, min, max);
        assert_eq!(clear, Vec2::ZERO);
    }

    #[test]
    fn test_sphere_aabb_center_inside_box() {
        let separation = sphere_aabb(
            Vec2::new(0.9, 0.5),
            0.5,
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
        );
        assert_approx_eq!(separation.x, 0.6, 1e-5);
        assert_approx_eq!(separation.y, 0.0, 1e-5);
    }

    #[test]
    fn test_sphere_sphere() {
        let separation = sphere_sphere(Vec2::new(0.8, 0.0), 0.5, Vec2::ZERO, 0.5);
        assert_approx_eq!(separation.x, 0.2, 1e-5);
        assert_eq!(
            sphere_sphere(Vec2::new(1.1, 0.0), 0.5, Vec2::ZERO, 0.5),
            Vec2::ZERO
        );
        // Coincident centres still separate
        assert_approx_eq!(
            sphere_sphere(Vec2::ONE, 0.5, Vec2::ONE, 0.5).length(),
            1.0,
            1e-5
        );
    }

    #[test]
    fn test_nan_positions_never_separate() {
        let nan = Vec2::splat(f32::NAN);
        assert_eq!(sphere_sphere(nan, 0.5, Vec2::ZERO, 0.5), Vec2::ZERO);
        assert_eq!(sphere_sphere(Vec2::ZERO, 0.5, nan, 0.5), Vec2::ZERO);
        assert_eq!(sphere_aabb(nan, 0.5, Vec2::ZERO, Vec2::ONE), Vec2::ZERO);
    }

    #[test]
    fn test_aabb_overlap() {
        let half = Vec2::splat(0.5);
        assert!(aabb_overlap(Vec2::ZERO, half, Vec2::new(0.9, 0.0), half));
        assert!(!aabb_overlap(Vec2::ZERO, half, Vec2::new(1.1, 0.0), half));
    }

    #[test]
    fn test_player_pushed_out_of_wall() {
        let arena = Arena::new(5).unwrap();
        let mut player = Player::new(0, Vec3::new(1.1, 2.5, 0.0), Vec3::ONE);
        resolve_player_walls(&arena, &mut player);
        assert_approx_eq!(player.position.x, 1.0 + PLAYER_RADIUS, 1e-5);
        assert_approx_eq!(player.position.y, 2.5, 1e-5);
    }

    #[test]
    fn test_players_pushed_apart_symmetrically() {
        let mut players = BTreeMap::new();
        players.insert(0, Player::new(0, Vec3::new(2.0, 2.0, 0.0), Vec3::ONE));
        players.insert(1, Player::new(1, Vec3::new(2.4, 2.0, 0.0), Vec3::ONE));

        resolve_player_collisions(&mut players);

        let gap = players[&1].position.x - players[&0].position.x;
        assert_approx_eq!(gap, 2.0 * PLAYER_RADIUS, 1e-5);
        assert_approx_eq!(players[&0].position.x + players[&1].position.x, 4.4, 1e-5);
    }

    #[test]
    fn test_shell_ignores_owner_and_damages_others() {
        let arena = Arena::new(6).unwrap();
        let mut players = BTreeMap::new();
        players.insert(0, Player::new(0, Vec3::new(2.5, 2.5, 0.0), Vec3::ONE));
        players.insert(1, Player::new(1, Vec3::new(3.5, 3.5, 0.0), Vec3::ONE));
        let mut shells = vec![
            TankShell::new(0, Vec2::X, Vec2::new(2.5, 2.5)),
            TankShell::new(0, Vec2::X, Vec2::new(3.5, 3.5)),
        ];

        let kills = resolve_shell_collisions(&arena, &mut players, &mut shells);

        assert!(kills.is_empty());
        assert_eq!(shells.len(), 1);
        assert_eq!(shells[0].position, Vec2::new(2.5, 2.5));
        let hit = &players[&1];
        assert!(hit.shield < players[&0].shield || hit.health < MAX_HEALTH);
    }

    #[test]
    fn test_lethal_shell_reports_kill() {
        let arena = Arena::new(6).unwrap();
        let mut players = BTreeMap::new();
        let mut victim = Player::new(4, Vec3::new(3.0, 3.0, 0.0), Vec3::ONE);
        victim.shield = 0.0;
        victim.health = 1.0;
        players.insert(4, victim);
        let mut shells = vec![TankShell::new(2, Vec2::X, Vec2::new(3.0, 3.0))];

        let kills = resolve_shell_collisions(&arena, &mut players, &mut shells);

        assert_eq!(
            kills,
            vec![Kill {
                killed: 4,
                killer: 2
            }]
        );
        assert!(shells.is_empty());
    }

    #[test]
    fn test_shell_destroyed_by_wall() {
        let arena = Arena::new(6).unwrap();
        let mut players = BTreeMap::new();
        let mut shells = vec![
            TankShell::new(0, Vec2::X, Vec2::new(0.95, 3.0)),
            TankShell::new(0, Vec2::X, Vec2::new(3.0, 3.0)),
        ];
        resolve_shell_collisions(&arena, &mut players, &mut shells);
        assert_eq!(shells.len(), 1);
        assert_eq!(shells[0].position, Vec2::new(3.0, 3.0));
    }

    #[test]
    fn test_remove_indices_tail_swap() {
        let mut items = vec!['a', 'b', 'c', 'd', 'e'];
        remove_indices(&mut items, vec![3, 0, 3]);
        items.sort_unstable();
        assert_eq!(items, vec!['b', 'c', 'e']);

        let mut tail = vec![1, 2, 3];
        remove_indices(&mut tail, vec![2, 1]);
        assert_eq!(tail, vec![1]);
    }
}
