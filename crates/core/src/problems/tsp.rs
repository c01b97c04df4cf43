use serde::{Deserialize, Serialize};

use crate::problem::Problem;

/// Travelling-salesman input: a full distance matrix plus the fixed route
/// prefix this subtree explores.
///
/// The matrix rides along in every task so any worker can evaluate a route
/// without sideband state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TspInput {
    pub distances: Vec<Vec<f64>>,
    /// Cities already committed, in visiting order.
    pub prefix: Vec<usize>,
}

impl TspInput {
    /// A fresh tour over `distances`, anchored at city 0.
    pub fn tour(distances: Vec<Vec<f64>>) -> Self {
        Self {
            distances,
            prefix: vec![0],
        }
    }
}

/// A closed tour and its length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub cities: Vec<usize>,
    pub length: f64,
}

/// Exact travelling-salesman search by exhaustive decomposition.
///
/// Splitting pins one more city onto the prefix per child; small enough
/// remainders are brute-forced in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tsp {
    /// Remainder size at or below which a task stops splitting and
    /// enumerates every completion.
    pub brute_force_size: usize,

    /// Depth down to which joins count as coarse and stay at the outermost
    /// tier.
    pub coarse_layer: u32,
}

impl Default for Tsp {
    fn default() -> Self {
        Self {
            brute_force_size: 8,
            coarse_layer: 3,
        }
    }
}

fn remaining_cities(input: &TspInput) -> Vec<usize> {
    (0..input.distances.len())
        .filter(|city| !input.prefix.contains(city))
        .collect()
}

/// Length of `route` closed back to its starting city.
fn tour_length(distances: &[Vec<f64>], route: &[usize]) -> f64 {
    let mut length = 0.0;
    for pair in route.windows(2) {
        length += distances[pair[0]][pair[1]];
    }
    if route.len() > 1 {
        length += distances[route[route.len() - 1]][route[0]];
    }
    length
}

fn search(
    distances: &[Vec<f64>],
    route: &mut Vec<usize>,
    remaining: &mut Vec<usize>,
    best: &mut Route,
) {
    if remaining.is_empty() {
        let length = tour_length(distances, route);
        if length < best.length {
            best.cities = route.clone();
            best.length = length;
        }
        return;
    }
    for i in 0..remaining.len() {
        let city = remaining.remove(i);
        route.push(city);
        search(distances, route, remaining, best);
        route.pop();
        remaining.insert(i, city);
    }
}

impl Problem for Tsp {
    type Input = TspInput;
    type Value = Route;

    fn name(&self) -> &'static str {
        "tsp"
    }

    fn is_atomic(&self, input: &TspInput) -> bool {
        remaining_cities(input).len() <= self.brute_force_size
    }

    fn solve(&self, input: &TspInput) -> Route {
        let mut route = input.prefix.clone();
        let mut remaining = remaining_cities(input);
        let mut best = Route {
            cities: Vec::new(),
            length: f64::INFINITY,
        };
        search(&input.distances, &mut route, &mut remaining, &mut best);
        best
    }

    fn split(&self, input: &TspInput) -> Vec<TspInput> {
        remaining_cities(input)
            .into_iter()
            .map(|city| {
                let mut prefix = input.prefix.clone();
                prefix.push(city);
                TspInput {
                    distances: input.distances.clone(),
                    prefix,
                }
            })
            .collect()
    }

    fn join(&self, args: Vec<Route>) -> Route {
        args.into_iter()
            .min_by(|a, b| a.length.total_cmp(&b.length))
            .unwrap_or(Route {
                cities: Vec::new(),
                length: f64::INFINITY,
            })
    }

    fn coarse_layer(&self) -> u32 {
        self.coarse_layer
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    /// Four cities on a unit square. The optimum walks the perimeter.
    fn square() -> Vec<Vec<f64>> {
        let d = std::f64::consts::SQRT_2;
        vec![
            vec![0.0, 1.0, d, 1.0],
            vec![1.0, 0.0, 1.0, d],
            vec![d, 1.0, 0.0, 1.0],
            vec![1.0, d, 1.0, 0.0],
        ]
    }

    fn random_matrix(cities: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut distances = vec![vec![0.0; cities]; cities];
        for a in 0..cities {
            for b in 0..cities {
                if a != b {
                    distances[a][b] = rng.gen_range(1.0..10.0);
                }
            }
        }
        distances
    }

    #[test]
    fn brute_force_finds_the_perimeter_tour() {
        let problem = Tsp::default();
        let input = TspInput::tour(square());
        assert!(problem.is_atomic(&input));

        let best = problem.solve(&input);
        assert!((best.length - 4.0).abs() < 1e-9);
        assert_eq!(best.cities.len(), 4);
        assert_eq!(best.cities[0], 0);
    }

    #[test]
    fn split_pins_each_remaining_city_once() {
        let problem = Tsp {
            brute_force_size: 2,
            ..Tsp::default()
        };
        let input = TspInput::tour(square());
        assert!(!problem.is_atomic(&input));

        let children = problem.split(&input);
        let mut pinned: Vec<usize> = children
            .iter()
            .map(|child| *child.prefix.last().unwrap())
            .collect();
        pinned.sort_unstable();
        assert_eq!(pinned, vec![1, 2, 3]);
        for child in &children {
            assert_eq!(child.prefix[0], 0);
            assert_eq!(child.prefix.len(), 2);
        }
    }

    #[test]
    fn one_level_of_decomposition_matches_direct_search() {
        let distances = random_matrix(7, 11);

        let whole = Tsp::default();
        let direct = whole.solve(&TspInput::tour(distances.clone()));

        let split_first = Tsp {
            brute_force_size: 5,
            ..Tsp::default()
        };
        let input = TspInput::tour(distances);
        assert!(!split_first.is_atomic(&input));
        let partials = split_first
            .split(&input)
            .into_iter()
            .map(|child| {
                assert!(split_first.is_atomic(&child));
                split_first.solve(&child)
            })
            .collect();
        let joined = split_first.join(partials);

        assert!((joined.length - direct.length).abs() < 1e-9);
    }

    #[test]
    fn join_keeps_the_shortest_route() {
        let problem = Tsp::default();
        let long = Route {
            cities: vec![0, 2, 1, 3],
            length: 5.65,
        };
        let short = Route {
            cities: vec![0, 1, 2, 3],
            length: 4.0,
        };
        let best = problem.join(vec![long, short.clone()]);
        assert_eq!(best, short);
    }
}
